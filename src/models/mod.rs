pub mod anime;
pub mod bulk;
pub mod pagination;
