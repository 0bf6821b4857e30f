pub mod table;

pub use table::{parse, parse_file, Table, BRAND_COLUMN};
