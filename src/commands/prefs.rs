use super::chats::to_json;
use crate::config::Config;
use crate::error::Result;
use crate::preferences::{PreferenceResolver, ResolvedPreferences, SessionPreferences};

/// Print the preferences a session would end up with
pub fn show_preferences(
    config: &Config,
    model: Option<&str>,
    temperature: Option<&str>,
) -> Result<()> {
    tracing::debug!(session = %config.session_name(), "Resolving session preferences");
    let resolver = PreferenceResolver::from_config(&config.completion);
    let resolved = resolver.resolve(&SessionPreferences::from_raw(model, temperature));

    if let Some(note) = model_fallback_note(&resolver, model, &resolved) {
        tracing::warn!("{}", note);
    }
    println!("{}", to_json(&resolved)?);
    Ok(())
}

/// Explain why a requested model was replaced, if it was
fn model_fallback_note(
    resolver: &PreferenceResolver,
    requested: Option<&str>,
    resolved: &ResolvedPreferences,
) -> Option<String> {
    let requested = requested.map(str::trim).filter(|model| !model.is_empty())?;
    if requested == resolved.model {
        return None;
    }
    Some(format!(
        "Model {} is not allowed (allowed: {}), using {}",
        requested,
        resolver.allowed_models().join(", "),
        resolved.model
    ))
}
