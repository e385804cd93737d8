//! Access layer for record-oriented operations.
//!
//! This module turns raw column pages into logical records:
//!
//! - **Table**: Owns page ranges, version chains and indexes for one table
//! - **PageRange**: Base records of a range plus their arena of tail entries
//! - **Index**: Ordered value-to-RID mapping, unique or accumulating
//! - **Value**: The fixed-width values a column slot can hold
//!
//! Page bytes are always reached through the shared bufferpool; everything
//! else a table needs to survive a restart is captured by `TableImage`.

pub mod image;
pub mod index;
pub mod range;
pub mod record;
pub mod table;
pub mod value;

pub use image::{PageImage, RangeImage, TableImage, TableMeta};
pub use index::{Index, IndexRange};
pub use range::{BaseSlot, PageRange, TailEntry, RANGE_CAPACITY};
pub use record::{Record, Rid};
pub use table::{Table, MAX_COLUMNS};
pub use value::{Value, MAX_TEXT_LEN};
