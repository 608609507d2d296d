use std::sync::Arc;
use std::time::Duration;

use nexus_core::{
    HttpFetcher, HttpMethod, HttpRequest, KeyValueStore, NexusConfig, ProviderPolicy,
    ReqwestHttpClient, UpstreamThrottle,
};
use serde_json::Value;

use crate::cli::{parse_pair, FetchArgs, MethodArg};
use crate::error::CliError;

pub async fn run(
    args: &FetchArgs,
    config: &NexusConfig,
    store: Arc<dyn KeyValueStore>,
) -> Result<Value, CliError> {
    let request = build_request(args)?;

    let mut fetcher =
        HttpFetcher::from_config(Arc::new(ReqwestHttpClient::new()), store, config);
    if let Some(policy) = policy_for(&request.url) {
        fetcher = fetcher.with_throttle(UpstreamThrottle::from_policy(&policy));
    }

    let ttl = args.ttl.map(Duration::from_secs);
    let fetched = fetcher.request(request, ttl, !args.no_cache).await?;
    Ok(serde_json::to_value(&fetched)?)
}

fn build_request(args: &FetchArgs) -> Result<HttpRequest, CliError> {
    let method = match args.method {
        MethodArg::Get => HttpMethod::Get,
        MethodArg::Post => HttpMethod::Post,
        MethodArg::Put => HttpMethod::Put,
        MethodArg::Delete => HttpMethod::Delete,
    };

    let mut request = HttpRequest::new(method, args.url.as_str());
    for raw in &args.query {
        let (name, value) = pair(raw)?;
        request = request.with_query(name, value);
    }
    for raw in &args.headers {
        let (name, value) = pair(raw)?;
        request = request.with_header(name, value);
    }
    if let Some(body) = &args.body {
        request = request.with_body(body.as_str());
    }
    Ok(request)
}

fn pair(raw: &str) -> Result<(String, String), CliError> {
    parse_pair(raw).ok_or_else(|| CliError::Usage(format!("expected NAME=VALUE, got '{raw}'")))
}

/// Local pacing for providers with a published quota, matched by host.
fn policy_for(url: &str) -> Option<ProviderPolicy> {
    let host = url.split("://").nth(1)?.split(['/', '?']).next()?;
    if host.ends_with("openweathermap.org") {
        ProviderPolicy::default_for("weather")
    } else if host.ends_with("newsapi.org") {
        ProviderPolicy::default_for("news")
    } else {
        None
    }
}
