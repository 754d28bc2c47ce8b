use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde_json::{Value, json};

use crate::{BoxFuture, Error, Result, ScrollPage, SearchEngine, UpdateReport};

/// HTTP client for an Elasticsearch-compatible cluster.
#[derive(Clone, Debug)]
pub struct ElasticsearchClient {
	client: Client,
	base_url: String,
	username: Option<String>,
	password: Option<String>,
}
impl ElasticsearchClient {
	pub fn new(cfg: &tally_config::Search) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

		Ok(Self {
			client,
			base_url: cfg.url.trim_end_matches('/').to_string(),
			username: cfg.username.clone(),
			password: cfg.password.clone(),
		})
	}

	fn request(&self, method: Method, path: &str) -> RequestBuilder {
		let builder = self.client.request(method, format!("{}/{path}", self.base_url));

		match &self.username {
			Some(username) => builder.basic_auth(username, self.password.as_deref()),
			None => builder,
		}
	}

	async fn send(&self, builder: RequestBuilder) -> Result<Value> {
		let res = builder.send().await?;
		let status = res.status();

		if !status.is_success() {
			let body = res.text().await.unwrap_or_default();

			return Err(Error::from_status(status.as_u16(), body));
		}

		let bytes = res.bytes().await?;

		if bytes.is_empty() {
			return Ok(Value::Null);
		}

		Ok(serde_json::from_slice(&bytes)?)
	}
}

impl SearchEngine for ElasticsearchClient {
	fn search<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move {
			tracing::debug!(index, "Running search.");

			self.send(self.request(Method::POST, &format!("{index}/_search")).json(body)).await
		})
	}

	fn open_scroll<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		keep_alive: &'a str,
	) -> BoxFuture<'a, Result<ScrollPage>> {
		Box::pin(async move {
			let response = self
				.send(
					self.request(Method::POST, &format!("{index}/_search"))
						.query(&[("scroll", keep_alive)])
						.json(body),
				)
				.await?;

			crate::parse_scroll_page(&response)
		})
	}

	fn next_scroll<'a>(
		&'a self,
		scroll_id: &'a str,
		keep_alive: &'a str,
	) -> BoxFuture<'a, Result<ScrollPage>> {
		Box::pin(async move {
			let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
			let response =
				self.send(self.request(Method::POST, "_search/scroll").json(&body)).await?;

			crate::parse_scroll_page(&response)
		})
	}

	fn clear_scroll<'a>(&'a self, scroll_id: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let body = json!({ "scroll_id": [scroll_id] });

			self.send(self.request(Method::DELETE, "_search/scroll").json(&body)).await?;

			Ok(())
		})
	}

	fn update_by_query<'a>(
		&'a self,
		index: &'a str,
		query: &'a Value,
		script: &'a Value,
	) -> BoxFuture<'a, Result<UpdateReport>> {
		Box::pin(async move {
			let body = json!({ "query": query, "script": script });
			let response = self
				.send(
					self.request(Method::POST, &format!("{index}/_update_by_query"))
						.query(&[("conflicts", "proceed"), ("refresh", "true")])
						.json(&body),
				)
				.await?;

			Ok(parse_update_report(&response))
		})
	}
}

fn parse_update_report(response: &Value) -> UpdateReport {
	UpdateReport {
		updated: response.get("updated").and_then(Value::as_u64).unwrap_or_default(),
		version_conflicts: response
			.get("version_conflicts")
			.and_then(Value::as_u64)
			.unwrap_or_default(),
	}
}
