use super::RandomSource;

/// Quality suffixes from highest to lowest fidelity.
pub const DEFAULT_SUFFIXES: [&str; 5] = [
    "maxresdefault.jpg",
    "sddefault.jpg",
    "mqdefault.jpg",
    "hqdefault.jpg",
    "default.jpg",
];

pub const DEFAULT_HOST: &str = "i.ytimg.com";

/// One URL to race, tagged with its quality suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub suffix: String,
    pub url: String,
}

/// Ordered quality suffixes plus the interchangeable hosts serving them.
///
/// The order is preference metadata only; the race picks the first
/// successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList {
    scheme: String,
    hosts: Vec<String>,
    suffixes: Vec<String>,
}

impl CandidateList {
    pub fn new<H, S>(hosts: H, suffixes: S) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            scheme: "https".to_owned(),
            hosts: hosts.into_iter().map(Into::into).collect(),
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Overrides the URL scheme, e.g. `http` for a local upstream.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Expands into one URL per suffix, each on a randomly picked host.
    /// Empty when there is no host.
    pub fn expand(&self, video_id: &str, random: &RandomSource) -> Vec<Candidate> {
        self.suffixes
            .iter()
            .filter_map(|suffix| {
                let host = random.pick(&self.hosts)?;
                Some(Candidate {
                    suffix: suffix.clone(),
                    url: format!("{}://{host}/vi/{video_id}/{suffix}", self.scheme),
                })
            })
            .collect()
    }
}

impl Default for CandidateList {
    fn default() -> Self {
        Self::new([DEFAULT_HOST], DEFAULT_SUFFIXES)
    }
}
