use crate::extension::ContentQuery;
use serde::Deserialize;

// Content command API models

fn first_page() -> u32 {
    1
}

/// Body of `POST /api/{anime,manga}/:id/search`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub allow_adult: bool,
}

impl From<SearchRequest> for ContentQuery {
    fn from(request: SearchRequest) -> Self {
        ContentQuery::search(request.query, request.page, request.allow_adult)
    }
}

/// Body of `POST /api/{anime,manga}/:id/discover`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub sort_type: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub allow_adult: bool,
}

impl From<DiscoverRequest> for ContentQuery {
    fn from(request: DiscoverRequest) -> Self {
        ContentQuery::discover(request.page, request.sort_type, request.genres, request.allow_adult)
    }
}

/// Body of `POST /api/{anime,manga}/:id/details`; `allowAdult` is ignored for anime
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsRequest {
    pub id: String,
    #[serde(default)]
    pub allow_adult: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesRequest {
    pub episode_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesRequest {
    pub chapter_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_request_defaults() {
        let request: SearchRequest = serde_json::from_value(json!({"query": "frieren"})).unwrap();
        let query = ContentQuery::from(request);

        assert_eq!(query.query.as_deref(), Some("frieren"));
        assert_eq!(query.page, 1);
        assert!(!query.allow_adult);
    }

    #[test]
    fn test_discover_request_camel_case() {
        let request: DiscoverRequest = serde_json::from_value(json!({
            "page": 3,
            "sortType": "popular",
            "genres": ["Action"],
            "allowAdult": true
        }))
        .unwrap();
        let query = ContentQuery::from(request);

        assert_eq!(query.page, 3);
        assert_eq!(query.sort_type.as_deref(), Some("popular"));
        assert_eq!(query.genres, vec!["Action".to_string()]);
        assert!(query.allow_adult);
        assert!(query.query.is_none());
    }
}
