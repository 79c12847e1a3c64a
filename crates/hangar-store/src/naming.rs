use std::path::Path;

/// Highest numbered probe tried before falling back to a random token.
pub const MAX_NAME_PROBES: u32 = 999;

/// Find a name derived from `base` that is free in `dir`.
///
/// Probes `base`, `base 2`, `base 3`, ... up to [`MAX_NAME_PROBES`], testing
/// for `<probe>.<extension>` (or the bare probe when `extension` is `None`).
/// When every probe is taken a UUID is returned instead. The returned name
/// never includes the extension.
pub fn unique_name(dir: &Path, base: &str, extension: Option<&str>) -> String {
    let taken = |candidate: &str| {
        let entry = match extension {
            Some(ext) => format!("{candidate}.{ext}"),
            None => candidate.to_owned(),
        };
        dir.join(entry).exists()
    };

    for n in 1..=MAX_NAME_PROBES {
        let candidate = if n == 1 {
            base.to_owned()
        } else {
            format!("{base} {n}")
        };
        if !taken(&candidate) {
            return candidate;
        }
    }

    let fallback = uuid::Uuid::new_v4().to_string();
    tracing::debug!("all {MAX_NAME_PROBES} probes for '{base}' taken, using {fallback}");
    fallback
}
