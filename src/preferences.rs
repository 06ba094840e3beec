//! Session preference resolution
//!
//! Callers may ask for a model and a sampling temperature. Both arrive
//! loosely typed from the presentation layer, so they are decoded once into
//! [`SessionPreferences`] and normalized by a [`PreferenceResolver`] built
//! from the configured model allow-list. Nothing here performs I/O.

use crate::config::CompletionConfig;
use serde::{Deserialize, Deserializer, Serialize};

/// Lowest accepted temperature
pub const MIN_TEMPERATURE: f64 = 0.1;

/// Highest accepted temperature
pub const MAX_TEMPERATURE: f64 = 1.0;

/// Temperature used when none is given or the given one is unusable
pub const DEFAULT_TEMPERATURE: f64 = 0.5;

/// Pick the model to use for a request
///
/// A blank or disallowed request falls back to the first allowed model. With
/// an empty allow-list the request is returned unchanged.
///
/// # Examples
///
/// ```
/// use parley::preferences::resolve_model;
///
/// let allowed = vec!["a".to_string(), "b".to_string()];
/// assert_eq!(resolve_model("", &allowed), "a");
/// assert_eq!(resolve_model("z", &allowed), "a");
/// assert_eq!(resolve_model("b", &allowed), "b");
/// assert_eq!(resolve_model("z", &[]), "z");
/// ```
pub fn resolve_model(requested: &str, allowed: &[String]) -> String {
    let Some(first) = allowed.first() else {
        return requested.to_string();
    };
    if !requested.is_empty() && allowed.iter().any(|model| model == requested) {
        requested.to_string()
    } else {
        first.clone()
    }
}

/// Clamp a temperature into the accepted range
///
/// NaN is replaced with [`DEFAULT_TEMPERATURE`].
///
/// # Examples
///
/// ```
/// use parley::preferences::clamp_temperature;
///
/// assert_eq!(clamp_temperature(-5.0), 0.1);
/// assert_eq!(clamp_temperature(5.0), 1.0);
/// assert_eq!(clamp_temperature(0.7), 0.7);
/// ```
pub fn clamp_temperature(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Parse a textual temperature, falling back to [`DEFAULT_TEMPERATURE`]
///
/// The result is not clamped.
pub fn parse_temperature(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(DEFAULT_TEMPERATURE)
}

/// Preferences a caller attached to their session
///
/// Decodes from JSON where `temperature` may be a number or a numeric
/// string. Anything else decodes to `None` instead of failing.
///
/// # Examples
///
/// ```
/// use parley::preferences::SessionPreferences;
///
/// let prefs: SessionPreferences =
///     serde_json::from_str(r#"{"model":"b","temperature":"0.9"}"#).unwrap();
/// assert_eq!(prefs.model.as_deref(), Some("b"));
/// assert_eq!(prefs.temperature, Some(0.9));
///
/// let prefs: SessionPreferences =
///     serde_json::from_str(r#"{"temperature":"warm"}"#).unwrap();
/// assert_eq!(prefs.temperature, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPreferences {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_temperature")]
    pub temperature: Option<f64>,
}

impl SessionPreferences {
    /// Build preferences from raw textual inputs, as found in a form or on
    /// the command line
    pub fn from_raw(model: Option<&str>, temperature: Option<&str>) -> Self {
        Self {
            model: model.map(str::to_string),
            temperature: temperature.map(parse_temperature),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTemperature {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

fn lenient_temperature<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTemperature>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawTemperature::Number(value)) => Some(value),
        Some(RawTemperature::Text(text)) => text.trim().parse::<f64>().ok(),
        Some(RawTemperature::Other(_)) | None => None,
    })
}

/// Preferences after defaulting and validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPreferences {
    pub model: String,
    pub temperature: f64,
}

/// Normalizes session preferences against the configured models
#[derive(Debug, Clone, Default)]
pub struct PreferenceResolver {
    allowed_models: Vec<String>,
}

impl PreferenceResolver {
    /// Create a resolver; the first allowed model is the default
    pub fn new(allowed_models: Vec<String>) -> Self {
        Self { allowed_models }
    }

    /// Resolver over the models allowed by the completion settings
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(config.models.clone())
    }

    /// Configured allow-list, default model first
    pub fn allowed_models(&self) -> &[String] {
        &self.allowed_models
    }

    /// See [`resolve_model`]
    pub fn resolve_model(&self, requested: &str) -> String {
        resolve_model(requested, &self.allowed_models)
    }

    /// Apply model fallback, temperature default and clamping
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::preferences::{PreferenceResolver, SessionPreferences};
    ///
    /// let resolver = PreferenceResolver::new(vec!["a".into(), "b".into()]);
    /// let resolved = resolver.resolve(&SessionPreferences {
    ///     model: Some("z".into()),
    ///     temperature: Some(3.0),
    /// });
    /// assert_eq!(resolved.model, "a");
    /// assert_eq!(resolved.temperature, 1.0);
    /// ```
    pub fn resolve(&self, preferences: &SessionPreferences) -> ResolvedPreferences {
        let requested = preferences.model.as_deref().map(str::trim).unwrap_or("");
        ResolvedPreferences {
            model: self.resolve_model(requested),
            temperature: clamp_temperature(preferences.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        }
    }
}
