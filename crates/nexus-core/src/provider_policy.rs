use std::time::Duration;

/// Published outbound quota of one upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider: String,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub fn new(provider: impl Into<String>, quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            provider: provider.into(),
            quota_window,
            quota_limit,
        }
    }

    /// OpenWeatherMap free tier: 60 calls per minute.
    pub fn openweather_default() -> Self {
        Self::new("weather", Duration::from_secs(60), 60)
    }

    /// NewsAPI developer plan: 100 requests per day.
    pub fn newsapi_default() -> Self {
        Self::new("news", Duration::from_secs(24 * 3600), 100)
    }

    /// Known quota for a provider namespace; providers without a published
    /// quota are not throttled locally.
    pub fn default_for(provider: &str) -> Option<Self> {
        match provider {
            "weather" => Some(Self::openweather_default()),
            "news" => Some(Self::newsapi_default()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openweather_policy_matches_free_tier() {
        let policy = ProviderPolicy::openweather_default();

        assert_eq!(policy.provider, "weather");
        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 60);
    }

    #[test]
    fn unknown_providers_have_no_policy() {
        assert_eq!(ProviderPolicy::default_for("news"), Some(ProviderPolicy::newsapi_default()));
        assert_eq!(ProviderPolicy::default_for("countries"), None);
    }
}
