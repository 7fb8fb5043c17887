pub mod prod_db;
pub mod tomorrow_io;
