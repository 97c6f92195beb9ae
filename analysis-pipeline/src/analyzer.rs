use crate::cache::ClassificationCache;
use crate::fingerprint::Fingerprint;
use futures::stream::StreamExt;
use llm_interface::PostClassifier;
use spotter_core::{
    AnalysisOutcome, AnalyzedPost, ClassificationError, CoreError, ErrorExt, RedditPost,
    RunSummary, DEFAULT_CONCURRENCY,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

enum Outcome {
    Hit,
    Miss,
    Failure,
    Skip,
}

/// Drives a fetched post batch through fingerprint, cache and classifier.
///
/// Posts are coalesced by fingerprint before dispatch, so each distinct
/// content costs at most one classifier call per run no matter how wide the
/// pool is; duplicates fan out from the first result. Calls run through a
/// bounded pool (`concurrency` in flight at once) while results land in
/// index-addressed slots, so output order always matches input order
/// regardless of completion order. A single post's failure or timeout is
/// recorded in its own record and never aborts the batch; the cache file is
/// written once, after every slot has filled.
pub struct BatchAnalyzer {
    classifier: Arc<dyn PostClassifier>,
    cache: Arc<ClassificationCache>,
    concurrency: usize,
    call_timeout: Duration,
}

impl BatchAnalyzer {
    pub fn new(classifier: Arc<dyn PostClassifier>, cache: Arc<ClassificationCache>) -> Self {
        Self {
            classifier,
            cache,
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set how many classifier calls may be in flight. `1` gives strictly
    /// sequential processing.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        posts: Vec<RedditPost>,
    ) -> Result<(Vec<AnalyzedPost>, RunSummary), CoreError> {
        let total = posts.len();
        info!(
            "Analyzing {} posts ({} classifier calls in flight max)",
            total, self.concurrency
        );

        let mut slots: Vec<Option<(AnalyzedPost, Outcome)>> =
            (0..total).map(|_| None).collect();

        // Group posts by fingerprint up front. One group means one classifier
        // call at most, so duplicate content never races itself into a
        // second paid call.
        let mut groups: Vec<(Fingerprint, Vec<(usize, RedditPost)>)> = Vec::new();
        let mut group_index: HashMap<Fingerprint, usize> = HashMap::new();
        for (index, post) in posts.into_iter().enumerate() {
            if post.over_18 {
                debug!("Skipping NSFW post {}", post.id);
                let analysis = AnalysisOutcome::Skipped {
                    reason: "nsfw".to_string(),
                };
                slots[index] = Some((AnalyzedPost { post, analysis }, Outcome::Skip));
                continue;
            }

            let fingerprint = Fingerprint::of(&post.title, &post.selftext);
            match group_index.get(&fingerprint) {
                Some(&slot) => groups[slot].1.push((index, post)),
                None => {
                    group_index.insert(fingerprint.clone(), groups.len());
                    groups.push((fingerprint, vec![(index, post)]));
                }
            }
        }

        {
            let mut completions = futures::stream::iter(groups.into_iter().map(
                |(fingerprint, members)| async move {
                    self.analyze_group(fingerprint, members).await
                },
            ))
            .buffer_unordered(self.concurrency);

            while let Some(results) = completions.next().await {
                for (index, record, outcome) in results {
                    slots[index] = Some((record, outcome));
                }
            }
        }

        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        let records: Vec<AnalyzedPost> = slots
            .into_iter()
            .map(|slot| slot.expect("every result slot is filled"))
            .map(|(record, outcome)| {
                match outcome {
                    Outcome::Hit => summary.hits += 1,
                    Outcome::Miss => summary.misses += 1,
                    Outcome::Failure => summary.failures += 1,
                    Outcome::Skip => summary.skipped += 1,
                }
                record
            })
            .collect();

        // Single writer, after all workers have finished.
        self.cache.save()?;

        info!("Analysis complete: {}", summary);
        Ok((records, summary))
    }

    /// Classify one fingerprint group. The first member pays for the call on
    /// a cache miss; every other member shares its result and counts as a
    /// hit. A failed call marks every member's record as failed.
    async fn analyze_group(
        &self,
        fingerprint: Fingerprint,
        members: Vec<(usize, RedditPost)>,
    ) -> Vec<(usize, AnalyzedPost, Outcome)> {
        let mut members = members.into_iter();
        let (first_index, first_post) = members.next().expect("group is never empty");

        if let Some(classification) = self.cache.get(&fingerprint) {
            debug!("Cache hit for post {} ({})", first_post.id, fingerprint);
            return std::iter::once((first_index, first_post, Outcome::Hit))
                .chain(members.map(|(index, post)| (index, post, Outcome::Hit)))
                .map(|(index, post, outcome)| {
                    let analysis = AnalysisOutcome::Classified {
                        classification: classification.clone(),
                    };
                    (index, AnalyzedPost { post, analysis }, outcome)
                })
                .collect();
        }

        let call = self
            .classifier
            .classify(&first_post.id, &first_post.title, &first_post.selftext);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(classification)) => {
                let classification =
                    if self.cache.put(fingerprint.clone(), classification.clone()) {
                        classification
                    } else {
                        // Lost a first-write race; reuse the stored entry so
                        // identical content yields identical records.
                        self.cache.get(&fingerprint).unwrap_or(classification)
                    };
                let mut results = vec![(
                    first_index,
                    AnalyzedPost {
                        post: first_post,
                        analysis: AnalysisOutcome::Classified {
                            classification: classification.clone(),
                        },
                    },
                    Outcome::Miss,
                )];
                for (index, post) in members {
                    let analysis = AnalysisOutcome::Classified {
                        classification: classification.clone(),
                    };
                    results.push((index, AnalyzedPost { post, analysis }, Outcome::Hit));
                }
                results
            }
            Ok(Err(e)) => {
                e.log_warn();
                self.fail_group(e.to_string(), first_index, first_post, members)
            }
            Err(_) => {
                let e = CoreError::Classification(ClassificationError::RequestTimeout);
                warn!(
                    "Classification of post {} timed out after {:?}",
                    first_post.id, self.call_timeout
                );
                self.fail_group(e.to_string(), first_index, first_post, members)
            }
        }
    }

    fn fail_group(
        &self,
        error: String,
        first_index: usize,
        first_post: RedditPost,
        members: impl Iterator<Item = (usize, RedditPost)>,
    ) -> Vec<(usize, AnalyzedPost, Outcome)> {
        std::iter::once((first_index, first_post))
            .chain(members)
            .map(|(index, post)| {
                let analysis = AnalysisOutcome::Failed {
                    error: error.clone(),
                };
                (index, AnalyzedPost { post, analysis }, Outcome::Failure)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use spotter_core::Classification;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClassifier {
        calls: AtomicUsize,
        fail_ids: HashSet<String>,
        delay: Duration,
    }

    impl MockClassifier {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_ids: HashSet::new(),
                delay: Duration::ZERO,
            }
        }

        fn failing_on(ids: &[&str]) -> Self {
            Self {
                fail_ids: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::new()
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostClassifier for MockClassifier {
        async fn classify(
            &self,
            post_id: &str,
            title: &str,
            _body: &str,
        ) -> Result<Classification, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_ids.contains(post_id) {
                return Err(CoreError::Classification(
                    ClassificationError::RequestTimeout,
                ));
            }
            Ok(Classification {
                post_id: post_id.to_string(),
                is_question: title.to_lowercase().contains("how do i"),
                confidence_score: 0.9,
                category: String::new(),
                reasoning: format!("mock judgment for {post_id}"),
            })
        }
    }

    fn post(id: &str, title: &str, body: &str) -> RedditPost {
        RedditPost {
            id: id.to_string(),
            title: title.to_string(),
            selftext: body.to_string(),
            author: "tester".to_string(),
            created_utc: 1743761699.0,
            subreddit: "test".to_string(),
            permalink: format!("/r/test/comments/{id}"),
            url: format!("https://reddit.com/r/test/comments/{id}"),
            score: 1,
            over_18: false,
        }
    }

    fn nsfw_post(id: &str) -> RedditPost {
        RedditPost {
            over_18: true,
            ..post(id, "How do I do something adult?", "")
        }
    }

    fn analyzer_with(
        classifier: Arc<MockClassifier>,
        dir: &tempfile::TempDir,
    ) -> (BatchAnalyzer, Arc<ClassificationCache>) {
        let cache = Arc::new(ClassificationCache::load(dir.path().join("cache.json")));
        let analyzer = BatchAnalyzer::new(classifier, Arc::clone(&cache));
        (analyzer, cache)
    }

    fn extract(record: &AnalyzedPost) -> Classification {
        match &record.analysis {
            AnalysisOutcome::Classified { classification } => classification.clone(),
            other => panic!("expected classified outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::failing_on(&["b"]));
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);

        let posts = vec![
            post("a", "How do I fix my bike?", ""),
            post("b", "How do I learn Rust?", ""),
            post("c", "How do I bake bread?", ""),
        ];

        let (records, summary) = analyzer.run(posts).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.misses, 2);
        assert!(records[0].analysis.is_classified());
        assert!(matches!(records[1].analysis, AnalysisOutcome::Failed { .. }));
        assert!(records[2].analysis.is_classified());
    }

    #[tokio::test]
    async fn test_duplicate_content_costs_one_call_at_default_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::new());
        // Defaults throughout: this is exactly what the binary runs.
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);

        let posts = vec![
            post("a", "How do I fix my bike?", ""),
            post("b", "How do I fix my bike?", ""),
        ];

        let (records, summary) = analyzer.run(posts).await.unwrap();

        assert_eq!(classifier.call_count(), 1);
        assert_eq!(summary.hits, 1);
        assert_eq!(summary.misses, 1);
        assert_eq!(summary.failures, 0);

        // Both records carry the same classification content.
        assert_eq!(extract(&records[0]), extract(&records[1]));
    }

    #[tokio::test]
    async fn test_duplicate_content_one_call_with_overlapping_calls() {
        let dir = tempfile::tempdir().unwrap();
        // The delay forces genuinely concurrent in-flight calls.
        let classifier =
            Arc::new(MockClassifier::new().with_delay(Duration::from_millis(20)));
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);
        let analyzer = analyzer.with_concurrency(8);

        let posts = vec![
            post("a", "How do I fix my bike?", ""),
            post("b", "How do I fix my bike?", ""),
            post("c", "How do I learn Rust?", ""),
            post("d", "How do I fix my bike?", ""),
        ];

        let (records, summary) = analyzer.run(posts).await.unwrap();

        // One call per distinct content, no matter the pool width.
        assert_eq!(classifier.call_count(), 2);
        assert_eq!(summary.misses, 2);
        assert_eq!(summary.hits, 2);
        assert_eq!(summary.failures, 0);

        assert_eq!(extract(&records[0]), extract(&records[1]));
        assert_eq!(extract(&records[0]), extract(&records[3]));
        assert_ne!(extract(&records[0]), extract(&records[2]));
    }

    #[tokio::test]
    async fn test_duplicate_failure_marks_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::failing_on(&["a"]));
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);

        let posts = vec![
            post("a", "How do I fix my bike?", ""),
            post("b", "How do I fix my bike?", ""),
        ];

        let (records, summary) = analyzer.run(posts).await.unwrap();

        assert_eq!(classifier.call_count(), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(summary.failures, 2);
        assert!(records
            .iter()
            .all(|r| matches!(r.analysis, AnalysisOutcome::Failed { .. })));
    }

    #[tokio::test]
    async fn test_prewarmed_cache_avoids_all_calls() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::new());

        {
            let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);
            let (_, summary) = analyzer
                .run(vec![post("a", "How do I fix my bike?", "")])
                .await
                .unwrap();
            assert_eq!(summary.misses, 1);
        }

        // Second run against the persisted cache: same content, new post id.
        let fresh_classifier = Arc::new(MockClassifier::new());
        let (analyzer, _cache) = analyzer_with(Arc::clone(&fresh_classifier), &dir);
        let (records, summary) = analyzer
            .run(vec![post("z", "How do I fix my bike?", "")])
            .await
            .unwrap();

        assert_eq!(fresh_classifier.call_count(), 0);
        assert_eq!(summary.hits, 1);
        assert_eq!(summary.misses, 0);
        // Cached classification still names the post that paid for it.
        assert_eq!(extract(&records[0]).post_id, "a");
    }

    #[tokio::test]
    async fn test_output_order_matches_input_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let classifier =
            Arc::new(MockClassifier::new().with_delay(Duration::from_millis(5)));
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);
        let analyzer = analyzer.with_concurrency(8);

        let posts: Vec<RedditPost> = (0..20)
            .map(|i| post(&format!("p{i}"), &format!("How do I count to {i}?"), ""))
            .collect();
        let expected_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();

        let (records, summary) = analyzer.run(posts).await.unwrap();

        let actual_ids: Vec<String> = records.iter().map(|r| r.post.id.clone()).collect();
        assert_eq!(actual_ids, expected_ids);
        assert_eq!(summary.total, 20);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test]
    async fn test_nsfw_posts_are_skipped_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::new());
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);

        let posts = vec![post("a", "How do I fix my bike?", ""), nsfw_post("x")];
        let (records, summary) = analyzer.run(posts).await.unwrap();

        assert_eq!(classifier.call_count(), 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[1].analysis,
            AnalysisOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_call_timeout_becomes_per_post_failure() {
        let dir = tempfile::tempdir().unwrap();
        let classifier =
            Arc::new(MockClassifier::new().with_delay(Duration::from_millis(200)));
        let (analyzer, _cache) = analyzer_with(Arc::clone(&classifier), &dir);
        let analyzer = analyzer.with_call_timeout(Duration::from_millis(10));

        let (records, summary) = analyzer
            .run(vec![post("slow", "How do I hurry up?", "")])
            .await
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert!(matches!(
            records[0].analysis,
            AnalysisOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cache_persisted_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(MockClassifier::new());
        let (analyzer, cache) = analyzer_with(Arc::clone(&classifier), &dir);

        analyzer
            .run(vec![post("a", "How do I fix my bike?", "")])
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert!(dir.path().join("cache.json").exists());
    }
}
