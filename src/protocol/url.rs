use serde::Deserialize;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const API_VERSION: u8 = 10;

// -----------------------------------------------------------------------------
// ----- Compression -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    None,
    #[default]
    ZlibStream,
}

impl Compression {
    pub fn as_query(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::ZlibStream => Some("zlib-stream"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway URL -----------------------------------------------------------

/// Appends the version, encoding and compression query to a gateway base URL.
/// Any query already present on `base` is replaced.
pub fn gateway_url(base: &str, compression: Compression) -> String {
    let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');

    let mut url = format!("{base}/?v={API_VERSION}&encoding=json");
    if let Some(mode) = compression.as_query() {
        url.push_str("&compress=");
        url.push_str(mode);
    }
    url
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
