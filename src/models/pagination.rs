use serde::{Deserialize, Serialize};

use crate::constants::limits::MAX_PAGE_SIZE;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_pages: u32,
    pub current_page: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageInfo {
    #[must_use]
    pub const fn single() -> Self {
        Self {
            total_pages: 1,
            current_page: 1,
            has_next_page: false,
            has_previous_page: false,
        }
    }

    /// Page info for `page` of a `total`-row result split into `size` rows.
    #[must_use]
    pub fn for_total(page: u64, size: u64, total: u64) -> Self {
        let total_pages = total.div_ceil(size.max(1));
        Self {
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
            current_page: u32::try_from(page).unwrap_or(u32::MAX),
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination<T> {
    pub page_info: PageInfo,
    pub items: Vec<T>,
}

impl<T> Pagination<T> {
    #[must_use]
    pub fn new(page: u64, size: u64, total: u64, items: Vec<T>) -> Self {
        Self {
            page_info: PageInfo::for_total(page, size, total),
            items,
        }
    }
}

/// Rejects `page < 1` and sizes outside `1..=100`.
pub fn validate(page: u64, size: u64) -> CoreResult<()> {
    if page < 1 {
        return Err(CoreError::invalid("page", format!("must be >= 1, got {page}")));
    }
    if size < 1 || size > MAX_PAGE_SIZE {
        return Err(CoreError::invalid(
            "size",
            format!("must be between 1 and {MAX_PAGE_SIZE}, got {size}"),
        ));
    }
    Ok(())
}
