pub mod boundary;
pub mod compute;
pub mod table;

pub use boundary::load_boundary;
pub use compute::{Feature, ImageCompute, LocalCatalog};
pub use table::{read_feature_table, write_feature_table, ScatterAxes, TableRecord};
