//! # Integration Tests Crate
//!
//! End-to-end scenarios that exercise the ledger core across crate
//! boundaries: seeding outputs through the faucet path, booking transfers,
//! forking realities on double-spends, querying the surviving views, and
//! anchoring votes with FPC payloads.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! └── src/
//!     ├── lib.rs          # This file
//!     └── ledger_flows.rs # Booking, forking, querying, pruning flows
//! ```
//!
//! ## Flow Categories
//!
//! 1. **Value movement**: faucet seed → booking → output visibility
//! 2. **Conflicts**: double-spends fork branch realities; both alternatives
//!    stay queryable under their own filters
//! 3. **Aggregation**: merged realities have permutation-stable identities
//! 4. **Vote anchoring**: FPC payload identity and wire format
//! 5. **Lifecycle**: handle release accounting and pruning

pub mod ledger_flows;
