//! Search API endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::models::Analysis;
use crate::AppState;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search query string.
    pub q: String,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// Search results with paging metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    /// Number of analyses matching the query across all pages.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub analysis: Analysis,
    pub score: f32,
}

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// GET /api/search - Search analyses.
pub async fn search_analyses(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let limit = params.limit.min(MAX_SEARCH_LIMIT);

    let page = match state.search.search(&params.q, limit, params.offset) {
        Ok(page) => page,
        Err(e) => return error(e, revision_id),
    };

    let mut results = Vec::with_capacity(page.hits.len());
    for hit in page.hits {
        match state.repo.get_analysis(&hit.analysis_id).await {
            Ok(Some(analysis)) => results.push(SearchResultItem {
                analysis,
                score: hit.score,
            }),
            // Removed from the database but not yet from the index.
            Ok(None) => tracing::debug!(id = %hit.analysis_id, "Skipping stale search hit"),
            Err(e) => return error(e, revision_id),
        }
    }

    success(
        SearchResponse {
            results,
            total: page.total,
            limit,
            offset: params.offset,
        },
        revision_id,
    )
}
