use studybuddy_common::catalog::{Course, collect_courses, parse_page};

use crate::config::CatalogConfig;
use crate::db;
use crate::error::AppError;

/// Client for the public class search endpoint.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn default_term(&self) -> &str {
        &self.config.term
    }

    async fn fetch_page(
        &self,
        term: &str,
        page: u32,
    ) -> Result<Vec<studybuddy_common::catalog::CatalogEntry>, AppError> {
        let resp = self
            .http
            .get(&self.config.url)
            .query(&[
                ("institution", self.config.institution.as_str()),
                ("term", term),
                ("page", &page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("catalog request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::BadGateway(format!(
                "catalog returned {status} for page {page}"
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::BadGateway(format!("catalog response failed: {e}")))?;
        parse_page(&body).map_err(|e| AppError::BadGateway(e.to_string()))
    }

    /// Requests pages 1, 2, ... until an empty page, capped at `max_pages`.
    #[tracing::instrument(skip(self), err)]
    pub async fn fetch_all(&self, term: &str) -> Result<Vec<Course>, AppError> {
        let mut entries = Vec::new();
        let mut page = 1;
        loop {
            if page > self.config.max_pages {
                tracing::warn!(
                    max_pages = self.config.max_pages,
                    "catalog did not end before the page limit"
                );
                break;
            }
            let rows = self.fetch_page(term, page).await?;
            if rows.is_empty() {
                break;
            }
            tracing::debug!(page, rows = rows.len(), "fetched catalog page");
            entries.extend(rows);
            page += 1;
        }
        Ok(collect_courses(&entries))
    }
}

/// Fetches the catalog for the configured term and replaces the cached
/// course list. An empty result keeps the previous cache.
pub async fn refresh(pool: &db::Db, client: &CatalogClient) -> Result<usize, AppError> {
    let courses = client.fetch_all(client.default_term()).await?;
    if courses.is_empty() {
        tracing::warn!("catalog returned no courses, keeping cached list");
        return Ok(0);
    }
    db::courses::replace_courses(pool, &courses).await?;
    tracing::info!(count = courses.len(), "course catalog refreshed");
    Ok(courses.len())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::Router;
    use axum::extract::Query;
    use axum::routing::get;

    use super::*;

    async fn serve_catalog(pages: usize) -> String {
        let app = Router::new().route(
            "/search",
            get(move |Query(params): Query<HashMap<String, String>>| async move {
                let page: usize = params
                    .get("page")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                assert_eq!(params.get("institution").map(String::as_str), Some("UVA01"));
                let body = if (1..=pages).contains(&page) {
                    serde_json::json!([
                        { "subject": "CS", "catalog_nbr": format!("{}100", page), "descr": "Course" },
                        { "subject": "CS", "catalog_nbr": "2100", "descr": "Data Structures" },
                    ])
                } else {
                    serde_json::json!([])
                };
                axum::Json(body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/search")
    }

    fn config(url: String, max_pages: u32) -> CatalogConfig {
        CatalogConfig {
            url,
            institution: "UVA01".into(),
            term: "1248".into(),
            max_pages,
            refresh_hours: 24,
        }
    }

    #[tokio::test]
    async fn pages_until_empty() {
        let url = serve_catalog(3).await;
        let client = CatalogClient::new(config(url, 50));
        let courses = client.fetch_all("1248").await.unwrap();
        let codes: Vec<_> = courses.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["CS 1100", "CS 2100", "CS 3100"]);
    }

    #[tokio::test]
    async fn stops_at_page_limit() {
        let url = serve_catalog(10).await;
        let client = CatalogClient::new(config(url, 2));
        let courses = client.fetch_all("1248").await.unwrap();
        assert_eq!(courses.len(), 2);
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn refresh_fills_course_cache() {
        let url = serve_catalog(1).await;
        let client = CatalogClient::new(config(url, 5));
        let pool = db::test_pool().await;
        assert_eq!(refresh(&pool, &client).await.unwrap(), 2);
        assert_eq!(db::courses::count_courses(&pool).await.unwrap(), 2);
    }
}
