//! Detects a pagination pattern from the first response and drives
//! subsequent requests until the pattern signals exhaustion.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationPattern {
    LinkHeader,
    Cursor,
    PageNumber,
    OffsetLimit,
    None,
}

/// One page as seen by the driver: parsed body, optional `Link` header
/// value.
pub struct PageResponse {
    pub body: Value,
    pub link_header: Option<String>,
}

/// Detect the pattern from the first response, in the priority order the
/// driver checks.
pub fn detect_pattern(page: &PageResponse) -> PaginationPattern {
    if let Some(link) = &page.link_header {
        if link.contains("rel=\"next\"") {
            return PaginationPattern::LinkHeader;
        }
    }

    let body = &page.body;
    if has_any_path(body, &["pagination.next_cursor", "next_cursor", "cursor", "nextPageToken", "next_page_token"]) {
        return PaginationPattern::Cursor;
    }
    if has_any_path(body, &["page", "total_pages"]) || has_any_path(body, &["current_page"]) || has_any_path(body, &["pageNumber"]) {
        return PaginationPattern::PageNumber;
    }
    if (has_any_path(body, &["offset"]) && has_any_path(body, &["limit"]))
        || (has_any_path(body, &["skip"]) && has_any_path(body, &["take"]))
    {
        return PaginationPattern::OffsetLimit;
    }
    PaginationPattern::None
}

fn has_any_path(value: &Value, paths: &[&str]) -> bool {
    paths.iter().any(|p| get_path(value, p).is_some())
}

fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Extract the item array from a page: explicit JSON-path when configured,
/// else the first of `body`, `body.data`, `body.items`, `body.results`,
/// else the first array-valued field, else empty.
pub fn extract_items(body: &Value, explicit_path: Option<&str>) -> Vec<Value> {
    if let Some(path) = explicit_path {
        if let Some(found) = get_path(body, path) {
            return as_array(found);
        }
        return Vec::new();
    }

    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    for key in ["data", "items", "results"] {
        if let Some(found) = body.get(key) {
            if found.is_array() {
                return as_array(found);
            }
        }
    }
    if let Some(obj) = body.as_object() {
        for value in obj.values() {
            if value.is_array() {
                return as_array(value);
            }
        }
    }
    Vec::new()
}

fn as_array(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

/// Parameters to apply to the next request, pattern-specifically.
pub enum NextRequest {
    Cursor { cursor: String },
    OffsetLimit { offset: u64, limit: u64 },
    PageNumber { page: u64 },
    LinkHeaderUrl { url: String },
    Done,
}

/// Compute the next page's request parameters, or `Done` when the pattern
/// signals exhaustion.
pub fn next_request(pattern: PaginationPattern, page: &PageResponse, current_offset: u64, current_limit: u64, current_page: u64) -> NextRequest {
    match pattern {
        PaginationPattern::LinkHeader => {
            let Some(link) = &page.link_header else { return NextRequest::Done };
            match extract_next_link(link) {
                Some(url) => NextRequest::LinkHeaderUrl { url },
                None => NextRequest::Done,
            }
        }
        PaginationPattern::Cursor => {
            let cursor = ["pagination.next_cursor", "next_cursor", "cursor", "nextPageToken", "next_page_token"]
                .iter()
                .find_map(|p| get_path(&page.body, p))
                .and_then(|v| v.as_str());
            match cursor {
                Some(c) if !c.is_empty() => NextRequest::Cursor { cursor: c.to_string() },
                _ => NextRequest::Done,
            }
        }
        PaginationPattern::PageNumber => {
            let total_pages = get_path(&page.body, "total_pages").and_then(Value::as_u64);
            if let Some(total) = total_pages {
                if current_page + 1 >= total {
                    return NextRequest::Done;
                }
            }
            NextRequest::PageNumber { page: current_page + 1 }
        }
        PaginationPattern::OffsetLimit => {
            if extract_items(&page.body, None).is_empty() {
                return NextRequest::Done;
            }
            NextRequest::OffsetLimit {
                offset: current_offset + current_limit,
                limit: current_limit,
            }
        }
        PaginationPattern::None => NextRequest::Done,
    }
}

fn extract_next_link(link_header: &str) -> Option<String> {
    for part in link_header.split(',') {
        if part.contains("rel=\"next\"") {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            return Some(part[start..end].to_string());
        }
    }
    None
}

/// Fetch up to `max_pages` pages via `fetch_page`, aggregating items in
/// order, stopping early on exhaustion.
pub async fn drive<F, Fut>(
    max_pages: u32,
    forced: Option<PaginationPattern>,
    item_path: Option<&str>,
    mut fetch_page: F,
) -> Vec<Value>
where
    F: FnMut(Option<NextRequestCursorState>) -> Fut,
    Fut: std::future::Future<Output = PageResponse>,
{
    let mut aggregated = Vec::new();
    let mut state: Option<NextRequestCursorState> = None;
    let mut offset = 0u64;
    let mut limit = 20u64;
    let mut page_no = 0u64;

    for _ in 0..max_pages.max(1) {
        let page = fetch_page(state.clone()).await;
        let pattern = forced.unwrap_or_else(|| detect_pattern(&page));
        let items = extract_items(&page.body, item_path);
        if items.is_empty() {
            aggregated.extend(items);
            break;
        }
        aggregated.extend(items);

        match next_request(pattern, &page, offset, limit, page_no) {
            NextRequest::Done => break,
            NextRequest::Cursor { cursor } => state = Some(NextRequestCursorState::Cursor(cursor)),
            NextRequest::OffsetLimit { offset: o, limit: l } => {
                offset = o;
                limit = l;
                state = Some(NextRequestCursorState::OffsetLimit(o, l));
            }
            NextRequest::PageNumber { page } => {
                page_no = page;
                state = Some(NextRequestCursorState::Page(page));
            }
            NextRequest::LinkHeaderUrl { url } => state = Some(NextRequestCursorState::Url(url)),
        }
    }

    aggregated
}

#[derive(Debug, Clone)]
pub enum NextRequestCursorState {
    Cursor(String),
    OffsetLimit(u64, u64),
    Page(u64),
    Url(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_cursor_pattern() {
        let page = PageResponse {
            body: json!({"items": [1], "next_cursor": "abc"}),
            link_header: None,
        };
        assert_eq!(detect_pattern(&page), PaginationPattern::Cursor);
    }

    #[test]
    fn detects_link_header_pattern() {
        let page = PageResponse {
            body: json!({"items": [1]}),
            link_header: Some("<https://x/page2>; rel=\"next\"".to_string()),
        };
        assert_eq!(detect_pattern(&page), PaginationPattern::LinkHeader);
    }

    #[test]
    fn detects_page_number_pattern() {
        let page = PageResponse {
            body: json!({"items": [1], "page": 1, "total_pages": 3}),
            link_header: None,
        };
        assert_eq!(detect_pattern(&page), PaginationPattern::PageNumber);
    }

    #[test]
    fn extracts_items_from_data_key() {
        let body = json!({"data": [1,2,3]});
        assert_eq!(extract_items(&body, None).len(), 3);
    }

    #[tokio::test]
    async fn drive_stops_at_max_pages() {
        let pages = [
            json!({"items": [1], "next_cursor": "p2"}),
            json!({"items": [2], "next_cursor": "p3"}),
            json!({"items": [3], "next_cursor": "p4"}),
        ];
        let mut call = 0usize;
        let items = drive(2, None, None, |_state| {
            let body = pages[call.min(pages.len() - 1)].clone();
            call += 1;
            async move { PageResponse { body, link_header: None } }
        })
        .await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn drive_honors_an_explicit_item_path() {
        let items = drive(1, Some(PaginationPattern::None), Some("results.rows"), |_state| async move {
            PageResponse {
                body: json!({"results": {"rows": [1, 2, 3]}}),
                link_header: None,
            }
        })
        .await;
        assert_eq!(items.len(), 3);
    }
}
