pub mod department;
pub mod pagination;
pub mod types;

pub use pagination::{paginate, CursorPage, PageCursor};
