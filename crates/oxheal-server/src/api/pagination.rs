use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub offset: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum U64Input {
    Number(u64),
    Text(String),
}

pub(crate) fn deserialize_optional_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<U64Input>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(U64Input::Number(number)) => Ok(Some(number)),
        Some(U64Input::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(DeError::custom),
    }
}

const MAX_PAGE_LIMIT: u64 = 1000;

impl PaginationParams {
    pub fn resolve_limit(limit: Option<u64>) -> usize {
        limit.unwrap_or(20).clamp(1, MAX_PAGE_LIMIT) as usize
    }

    pub fn resolve_offset(offset: Option<u64>) -> usize {
        offset.unwrap_or(0) as usize
    }

    pub fn limit(&self) -> usize {
        Self::resolve_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        Self::resolve_offset(self.offset)
    }

    /// Applies the page to an already ordered list, returning the page and
    /// the total before paging.
    pub fn page<T>(&self, items: Vec<T>) -> (Vec<T>, usize) {
        let total = items.len();
        let page = items
            .into_iter()
            .skip(self.offset())
            .take(self.limit())
            .collect();
        (page, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped_and_strings_parse() {
        let params: PaginationParams =
            serde_json::from_value(serde_json::json!({"limit": "5000", "offset": 2})).unwrap();
        assert_eq!(params.limit(), 1000);
        assert_eq!(params.offset(), 2);
        assert_eq!(PaginationParams::default().limit(), 20);
    }

    #[test]
    fn page_skips_and_takes() {
        let params = PaginationParams {
            limit: Some(2),
            offset: Some(1),
        };
        let (page, total) = params.page(vec![1, 2, 3, 4]);
        assert_eq!(page, vec![2, 3]);
        assert_eq!(total, 4);
    }
}
