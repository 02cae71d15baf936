use ctdlabel_core::{BackendKind, Category};

pub(super) fn parse_min_one_usize(raw: &str) -> std::result::Result<usize, String> {
    let value = raw
        .parse::<usize>()
        .map_err(|_| format!("invalid integer value '{raw}'"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}

pub(super) fn parse_min_one_u64(raw: &str) -> std::result::Result<u64, String> {
    let value = raw
        .parse::<u64>()
        .map_err(|_| format!("invalid integer value '{raw}'"))?;
    if value == 0 {
        return Err("value must be >= 1".to_string());
    }
    Ok(value)
}

pub(super) fn parse_backend(raw: &str) -> std::result::Result<BackendKind, String> {
    BackendKind::parse(raw).map_err(|err| err.to_string())
}

pub(super) fn parse_model(raw: &str) -> std::result::Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("model must not be empty".to_string());
    }
    Ok(value.to_string())
}

pub(super) fn parse_category(raw: &str) -> std::result::Result<Category, String> {
    Category::parse(raw).ok_or_else(|| format!("unknown category '{raw}'"))
}
