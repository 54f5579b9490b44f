//! A dual-structure longest prefix match table.
//!
//! An authoritative bit-level **1-trie** ([`btrie`]) holds every
//! inserted `(addr, masklen) -> payload` mapping exactly once. A
//! derived 256-way, stride-8 **m-trie** ([`mtrie`]) is kept in sync
//! with it by [`expand`] (on insert/update) and [`delete`] (on
//! delete), and is the only structure the datapath ([`Table::search`])
//! ever touches.
//!
//! Mutating operations require `&mut Table`; the borrow checker is
//! this crate's single-writer enforcement, so there is no internal
//! locking. `search` and `find_exact` take `&Table` and compose freely
//! across threads.
//!
//! ```
//! use fibtrie::{Addr, Table};
//! use std::net::Ipv4Addr;
//!
//! let mut table: Table<u32> = Table::create("example").unwrap();
//! table.add(Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0)), 8, 100).unwrap();
//! table.add(Addr::from_ipv4(Ipv4Addr::new(10, 1, 0, 0)), 16, 200).unwrap();
//!
//! let probe = Addr::from_ipv4(Ipv4Addr::new(10, 1, 2, 3));
//! assert_eq!(table.search(&probe), (Some(200), false));
//! ```

mod addr;
pub(crate) mod alloc;
pub(crate) mod bits;
pub(crate) mod btrie;
mod delete;
pub(crate) mod expand;
pub(crate) mod mtrie;
mod error;
mod prefix;
mod stats;
mod table;

pub use addr::{Addr, LEVEL_MAX};
pub use error::{TableError, TableResult};
pub use prefix::{Prefix, MAX_MASKLEN, NAME_LEN};
pub use stats::Stats;
pub use table::Table;
