//! Quality race: request every candidate thumbnail at once and hand back the
//! first one the upstream actually has.
//!
//! Attempts run detached on the resolver's [`TaskTracker`]. The winner is
//! passed through a capacity-1 channel; each attempt owns a sender, so the
//! receiver sees the channel close once every attempt has finished without
//! a win. Responses that lose, arrive late, or find the receiver gone are
//! dropped by the attempt that produced them.

mod candidates;
mod fetcher;
mod random;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

pub use self::candidates::{Candidate, CandidateList, DEFAULT_HOST, DEFAULT_SUFFIXES};
pub use self::fetcher::{
    BodyStream, FetchError, FetchRequest, ProfileFetcher, UpstreamFetcher, UpstreamResponse,
};
pub use self::random::{REQUEST_ID_LEN, RandomSource};

use crate::transport::TransportProfile;

pub const UPSTREAM_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";
pub const UPSTREAM_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";
pub const UPSTREAM_ACCEPT_ENCODING: &str = "gzip, deflate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no candidate thumbnail exists")]
    NotFound,

    #[error("upstream refused every candidate with 403")]
    Forbidden,
}

/// The winning candidate.
#[derive(Debug)]
pub struct Resolution {
    pub candidate: Candidate,
    pub response: UpstreamResponse,
}

pub struct QualityRaceResolver {
    fetcher: Arc<dyn UpstreamFetcher>,
    candidates: CandidateList,
    random: Arc<RandomSource>,
    headers: HeaderMap,
    tracker: TaskTracker,
}

impl QualityRaceResolver {
    pub fn new(
        fetcher: Arc<dyn UpstreamFetcher>,
        candidates: CandidateList,
        random: Arc<RandomSource>,
    ) -> Self {
        Self {
            fetcher,
            candidates,
            random,
            headers: upstream_headers(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_profile(
        profile: TransportProfile,
        candidates: CandidateList,
        random: Arc<RandomSource>,
    ) -> Self {
        Self::new(Arc::new(ProfileFetcher::new(profile)), candidates, random)
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    pub fn random(&self) -> &Arc<RandomSource> {
        &self.random
    }

    /// Attempts still running, including ones whose request already
    /// returned.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Races every candidate for `video_id` using `method` (GET or HEAD).
    ///
    /// Fails with [`ResolveError::Forbidden`] only when nothing won and at
    /// least one candidate answered 403.
    pub async fn resolve(
        &self,
        video_id: &str,
        method: Method,
    ) -> Result<Resolution, ResolveError> {
        let candidates = self.candidates.expand(video_id, &self.random);
        let (winner_tx, mut winner_rx) = mpsc::channel::<Resolution>(1);
        let forbidden = Arc::new(AtomicBool::new(false));

        for candidate in candidates {
            let request = FetchRequest {
                method: method.clone(),
                url: candidate.url.clone(),
                headers: self.headers.clone(),
            };
            self.tracker.spawn(attempt(
                Arc::clone(&self.fetcher),
                candidate,
                request,
                winner_tx.clone(),
                Arc::clone(&forbidden),
            ));
        }
        drop(winner_tx);

        let winner = winner_rx.recv().await;
        // Later winners now fail their send and release themselves.
        winner_rx.close();
        drop(winner_rx);

        match winner {
            Some(resolution) => {
                debug!(
                    video_id,
                    suffix = %resolution.candidate.suffix,
                    "Resolved thumbnail"
                );
                Ok(resolution)
            }
            None if forbidden.load(Ordering::Acquire) => Err(ResolveError::Forbidden),
            None => Err(ResolveError::NotFound),
        }
    }

    /// Waits for every detached attempt to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn attempt(
    fetcher: Arc<dyn UpstreamFetcher>,
    candidate: Candidate,
    request: FetchRequest,
    winner_tx: mpsc::Sender<Resolution>,
    forbidden: Arc<AtomicBool>,
) {
    match fetcher.fetch(request).await {
        Ok(response) if response.status == StatusCode::OK => {
            let resolution = Resolution {
                candidate,
                response,
            };
            if let Err(e) = winner_tx.try_send(resolution) {
                let late = e.into_inner();
                trace!(url = %late.candidate.url, "Dropping late winner");
            }
        }
        Ok(response) => {
            if response.status == StatusCode::FORBIDDEN {
                forbidden.store(true, Ordering::Release);
            }
            trace!(url = %candidate.url, status = %response.status, "Candidate lost");
        }
        Err(e) => {
            debug!(url = %candidate.url, error = %e, "Candidate request failed");
        }
    }
}

fn upstream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(UPSTREAM_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(UPSTREAM_ACCEPT));
    headers.insert(
        ACCEPT_ENCODING,
        HeaderValue::from_static(UPSTREAM_ACCEPT_ENCODING),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::Stream;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use std::time::Duration;

    struct OpenGuard(Arc<AtomicUsize>);

    impl Drop for OpenGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Body that counts as open until it is dropped.
    struct CountedBody {
        chunk: Option<Bytes>,
        _open: OpenGuard,
    }

    impl Stream for CountedBody {
        type Item = Result<Bytes, std::io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.chunk.take().map(Ok))
        }
    }

    /// Synthetic upstream: per-suffix delay and status, 404 for anything
    /// unscripted.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: HashMap<String, (Duration, u16)>,
        open: Arc<AtomicUsize>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedFetcher {
        fn new<'a>(script: impl IntoIterator<Item = (&'a str, u64, u16)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(suffix, delay_ms, status)| {
                        (suffix.to_owned(), (Duration::from_millis(delay_ms), status))
                    })
                    .collect(),
                ..Default::default()
            }
        }

        fn open(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamFetcher for ScriptedFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<UpstreamResponse, FetchError> {
            self.requests.lock().push(request.clone());
            let suffix = request.url.rsplit('/').next().unwrap_or_default();
            let (delay, status) = self
                .script
                .get(suffix)
                .copied()
                .unwrap_or((Duration::ZERO, 404));
            tokio::time::sleep(delay).await;

            self.open.fetch_add(1, Ordering::SeqCst);
            let body = CountedBody {
                chunk: Some(Bytes::from(format!("image:{suffix}"))),
                _open: OpenGuard(Arc::clone(&self.open)),
            };
            Ok(UpstreamResponse::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Box::pin(body),
            ))
        }
    }

    fn resolver(fetcher: &Arc<ScriptedFetcher>) -> QualityRaceResolver {
        QualityRaceResolver::new(
            Arc::clone(fetcher) as Arc<dyn UpstreamFetcher>,
            CandidateList::default(),
            Arc::new(RandomSource::seeded(42)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_wins_and_losers_are_released() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 10, 404),
            ("sddefault.jpg", 30, 200),
            ("mqdefault.jpg", 50, 200),
            ("hqdefault.jpg", 5, 500),
            ("default.jpg", 70, 200),
        ]));
        let resolver = resolver(&fetcher);

        let resolution = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap();
        assert_eq!(resolution.candidate.suffix, "sddefault.jpg");

        resolver.drain().await;
        assert_eq!(resolver.in_flight(), 0);
        // Only the winner we hold is still open.
        assert_eq!(fetcher.open(), 1);

        let body = resolution.response.into_bytes().await.unwrap();
        assert_eq!(&body[..], b"image:sddefault.jpg");
        assert_eq!(fetcher.open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn winner_may_arrive_last() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 1, 404),
            ("sddefault.jpg", 2, 404),
            ("mqdefault.jpg", 3, 404),
            ("hqdefault.jpg", 4, 404),
            ("default.jpg", 100, 200),
        ]));
        let resolver = resolver(&fetcher);

        let resolution = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap();
        assert_eq!(resolution.candidate.suffix, "default.jpg");
        drop(resolution);

        resolver.drain().await;
        assert_eq!(fetcher.open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_winners_yield_exactly_one() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 10, 200),
            ("sddefault.jpg", 10, 200),
            ("mqdefault.jpg", 10, 200),
            ("hqdefault.jpg", 10, 200),
            ("default.jpg", 10, 200),
        ]));
        let resolver = resolver(&fetcher);

        let resolution = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap();
        resolver.drain().await;
        assert_eq!(fetcher.open(), 1);

        drop(resolution);
        assert_eq!(fetcher.open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_mean_not_found() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 5, 404),
            ("sddefault.jpg", 1, 500),
            ("default.jpg", 3, 302),
        ]));
        let resolver = resolver(&fetcher);

        let err = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound);

        resolver.drain().await;
        assert_eq!(fetcher.open(), 0);
        assert_eq!(fetcher.requests.lock().len(), DEFAULT_SUFFIXES.len());
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_is_reported_when_nothing_wins() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 5, 403),
            ("sddefault.jpg", 1, 404),
        ]));
        let resolver = resolver(&fetcher);

        let err = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap_err();
        assert_eq!(err, ResolveError::Forbidden);
    }

    #[tokio::test(start_paused = true)]
    async fn success_beats_forbidden() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 1, 403),
            ("sddefault.jpg", 1, 403),
            ("default.jpg", 50, 200),
        ]));
        let resolver = resolver(&fetcher);

        let resolution = resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap();
        assert_eq!(resolution.candidate.suffix, "default.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_requests_release_everything() {
        let fetcher = Arc::new(ScriptedFetcher::new([
            ("maxresdefault.jpg", 50, 200),
            ("sddefault.jpg", 60, 200),
            ("mqdefault.jpg", 70, 404),
        ]));
        let resolver = resolver(&fetcher);

        // The client goes away before any attempt completes.
        let outcome = tokio::time::timeout(
            Duration::from_millis(5),
            resolver.resolve("dQw4w9WgXcQ", Method::GET),
        )
        .await;
        assert!(outcome.is_err());
        assert!(resolver.in_flight() > 0);

        resolver.drain().await;
        assert_eq!(resolver.in_flight(), 0);
        assert_eq!(fetcher.open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_headers_and_method_are_forwarded() {
        let fetcher = Arc::new(ScriptedFetcher::new([("default.jpg", 1, 200)]));
        let resolver = resolver(&fetcher);

        resolver.resolve("dQw4w9WgXcQ", Method::HEAD).await.unwrap();
        resolver.drain().await;

        let requests = fetcher.requests.lock();
        assert_eq!(requests.len(), DEFAULT_SUFFIXES.len());
        for request in requests.iter() {
            assert_eq!(request.method, Method::HEAD);
            assert_eq!(request.headers[USER_AGENT], UPSTREAM_USER_AGENT);
            assert_eq!(request.headers[ACCEPT], UPSTREAM_ACCEPT);
            assert_eq!(request.headers[ACCEPT_ENCODING], UPSTREAM_ACCEPT_ENCODING);
            assert!(request.url.starts_with("https://i.ytimg.com/vi/dQw4w9WgXcQ/"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_host_choice_is_reproducible() {
        let hosts = ["i1.example", "i2.example", "i3.example"];
        let run = |seed: u64| async move {
            let fetcher = Arc::new(ScriptedFetcher::new([("default.jpg", 1, 200)]));
            let resolver = QualityRaceResolver::new(
                Arc::clone(&fetcher) as Arc<dyn UpstreamFetcher>,
                CandidateList::new(hosts, DEFAULT_SUFFIXES),
                Arc::new(RandomSource::seeded(seed)),
            );
            resolver.resolve("dQw4w9WgXcQ", Method::GET).await.unwrap();
            resolver.drain().await;
            let mut urls: Vec<String> =
                fetcher.requests.lock().iter().map(|r| r.url.clone()).collect();
            urls.sort();
            urls
        };

        assert_eq!(run(9).await, run(9).await);
    }

    #[tokio::test]
    async fn header_timeout_counts_as_a_loss() {
        use crate::transport::{HttpVersion, IpFamily, build_profile};

        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let profile = build_profile(HttpVersion::Http1, None, IpFamily::V4).unwrap();
        let fetcher = ProfileFetcher::new(profile);
        let request = FetchRequest {
            method: Method::GET,
            url: format!("http://{addr}/vi/x/default.jpg"),
            headers: upstream_headers(),
        };

        tokio::time::pause();
        let err = fetcher.fetch(request).await.unwrap_err();
        assert!(matches!(err, FetchError::HeaderTimeout(_)));
    }
}
