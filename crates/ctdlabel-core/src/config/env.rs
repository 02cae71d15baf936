/// Variable lookup; `std::env::var` in production, a map in tests.
pub(super) type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[must_use]
pub(super) fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[must_use]
pub(super) fn read_non_empty_env(lookup: EnvLookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub(super) fn read_env_usize(
    lookup: EnvLookup<'_>,
    name: &str,
    default_value: usize,
    min_value: usize,
) -> usize {
    lookup(name)
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

#[must_use]
pub(super) fn read_env_u32(
    lookup: EnvLookup<'_>,
    name: &str,
    default_value: u32,
    min_value: u32,
) -> u32 {
    lookup(name)
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|value| *value >= min_value)
        .unwrap_or(default_value)
}

#[must_use]
pub(super) fn read_env_u64(lookup: EnvLookup<'_>, name: &str) -> Option<u64> {
    lookup(name).and_then(|raw| raw.trim().parse::<u64>().ok())
}

#[must_use]
pub(super) fn parse_env_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()),
        Some(value) if matches!(value.as_str(), "1" | "true" | "yes" | "on")
    )
}

#[must_use]
pub(super) fn parse_enabled_default_true(raw: Option<&str>) -> bool {
    !matches!(
        raw.map(|value| value.trim().to_ascii_lowercase())
            .as_deref(),
        Some("off" | "none" | "0" | "false" | "no")
    )
}
