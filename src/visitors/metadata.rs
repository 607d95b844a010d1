use super::Visitor;
use crate::apis::fetch_text;
use crate::constants::LINK_TYPE_RELATION;
use crate::error::Result;
use crate::images::{image_key, ImageMirror};
use crate::normalize::collapse_whitespace;
use crate::types::{Event, Link, Performer};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};

static RESULT_ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse("li.searchresult").unwrap());
static RESULT_HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse(".heading a").unwrap());
static RESULT_URL: Lazy<Selector> = Lazy::new(|| Selector::parse(".itemurl a").unwrap());
static BIO: Lazy<Selector> = Lazy::new(|| Selector::parse("#bio-text").unwrap());
static BAND_LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("#band-links a").unwrap());
static OG_VIDEO: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:video"]"#).unwrap());
static OG_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());

/// One hit of an external performer search, in result order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub url: String,
    /// 0-based position in the result list
    pub rank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateDetails {
    pub bio: String,
    pub embed_url: String,
    pub image_url: Option<String>,
    pub links: Vec<Link>,
}

/// External search-and-detail service for performer metadata
#[async_trait::async_trait]
pub trait MetadataService: Send + Sync {
    async fn search(&self, name: &str, home: &str) -> Result<Vec<Candidate>>;

    async fn details(&self, candidate: &Candidate) -> Result<CandidateDetails>;
}

/// Scrapes a band-page search site: a result list page and one page per band.
pub struct BandPageClient {
    search_url: String,
    client: reqwest::Client,
}

impl BandPageClient {
    pub fn new(search_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            search_url: search_url.into(),
            client,
        }
    }

    pub fn parse_search_results(html: &str) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        document
            .select(&RESULT_ITEM)
            .filter_map(|item| {
                let heading = item.select(&RESULT_HEADING).next()?;
                let name = collapse_whitespace(&heading.text().collect::<String>());
                let url = item
                    .select(&RESULT_URL)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .or_else(|| heading.value().attr("href"))?
                    .split('?')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() || url.is_empty() {
                    return None;
                }
                Some((name, url))
            })
            .enumerate()
            .map(|(rank, (name, url))| Candidate { name, url, rank })
            .collect()
    }

    pub fn parse_details(html: &str) -> CandidateDetails {
        let document = Html::parse_document(html);
        let meta = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|m| m.value().attr("content"))
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        };

        let bio = document
            .select(&BIO)
            .next()
            .map(|b| collapse_whitespace(&b.text().collect::<String>()))
            .unwrap_or_default();
        let links = document
            .select(&BAND_LINKS)
            .filter_map(|a| {
                let uri = a.value().attr("href")?.trim().to_string();
                if uri.is_empty() {
                    return None;
                }
                Some(Link {
                    uri,
                    kind: LINK_TYPE_RELATION.to_string(),
                    description: collapse_whitespace(&a.text().collect::<String>()),
                })
            })
            .collect();

        CandidateDetails {
            bio,
            embed_url: meta(&OG_VIDEO).unwrap_or_default(),
            image_url: meta(&OG_IMAGE),
            links,
        }
    }
}

#[async_trait::async_trait]
impl MetadataService for BandPageClient {
    async fn search(&self, name: &str, home: &str) -> Result<Vec<Candidate>> {
        let query = format!("{} {}", name, home);
        let html = self
            .client
            .get(&self.search_url)
            .query(&[("q", query.trim())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let candidates = Self::parse_search_results(&html);
        debug!(performer = name, candidates = candidates.len(), "Searched band pages");
        Ok(candidates)
    }

    async fn details(&self, candidate: &Candidate) -> Result<CandidateDetails> {
        let html = fetch_text(&self.client, &candidate.url).await?;
        Ok(Self::parse_details(&html))
    }
}

/// Case-insensitive edit distance plus list rank; lower is better.
pub fn score(query: &str, candidate: &Candidate) -> usize {
    strsim::levenshtein(&query.to_lowercase(), &candidate.name.to_lowercase()) + candidate.rank
}

/// Lowest-scoring candidate, if its score is within `threshold`.
pub fn best_candidate<'a>(
    query: &str,
    candidates: &'a [Candidate],
    threshold: usize,
) -> Option<&'a Candidate> {
    candidates
        .iter()
        .map(|c| (score(query, c), c))
        .min_by_key(|(s, _)| *s)
        .filter(|(s, _)| *s <= threshold)
        .map(|(_, c)| c)
}

/// Fills in bio, player, links and images of performers that are not in the
/// catalog yet and have no listen URL.
pub struct MetadataVisitor {
    service: Arc<dyn MetadataService>,
    mirror: Arc<dyn ImageMirror>,
    threshold: usize,
}

impl MetadataVisitor {
    pub fn new(
        service: Arc<dyn MetadataService>,
        mirror: Arc<dyn ImageMirror>,
        threshold: usize,
    ) -> Self {
        Self {
            service,
            mirror,
            threshold,
        }
    }

    async fn enrich(&self, performer: &mut Performer) -> Result<()> {
        let candidates = self.service.search(&performer.name, &performer.home).await?;
        let Some(best) = best_candidate(&performer.name, &candidates, self.threshold) else {
            debug!(
                performer = %performer.name,
                candidates = candidates.len(),
                "No candidate within threshold"
            );
            return Ok(());
        };
        let details = self.service.details(best).await?;

        performer.listen_url = best.url.clone();
        if !details.bio.is_empty() {
            performer.info = details.bio;
        }
        if !details.embed_url.is_empty() {
            performer.embed_url = details.embed_url;
        }
        if !details.links.is_empty() {
            performer.links = details.links;
        }

        if let Some(image_url) = details.image_url {
            match self.mirror.mirror(&image_key(&performer.name, &performer.genre), &image_url).await {
                Ok(images) => performer.images = images,
                Err(e) => {
                    warn!(performer = %performer.name, url = %image_url, error = %e, "Image mirror failed")
                }
            }
        }

        info!(performer = %performer.name, url = %performer.listen_url, "Enriched performer");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Visitor for MetadataVisitor {
    fn name(&self) -> &str {
        "metadata"
    }

    async fn visit(&self, event: &mut Event) -> Result<()> {
        for performer in event
            .performers
            .iter_mut()
            .filter(|p| p.id.is_none() && p.listen_url.is_empty())
        {
            if let Err(e) = self.enrich(performer).await {
                warn!(performer = %performer.name, error = %e, "Metadata lookup failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RENDITION_ORIGINAL;
    use crate::error::ScraperError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const SEARCH_PAGE: &str = r#"
<ul class="result-items">
  <li class="searchresult band">
    <div class="heading"><a href="https://diekatzen.example.org?from=search">Die Katzen</a></div>
    <div class="itemurl"><a href="https://diekatzen.example.org?from=search">diekatzen.example.org</a></div>
  </li>
  <li class="searchresult band">
    <div class="heading"><a href="https://diekatze.example.org?from=search"> Die  Katze </a></div>
    <div class="itemurl"><a href="https://diekatze.example.org?from=search">diekatze.example.org</a></div>
  </li>
  <li class="searchresult album"><div class="heading">kaputt</div></li>
</ul>"#;

    const BAND_PAGE: &str = r#"
<html><head>
  <meta property="og:image" content="https://img.example.org/katze.jpg">
  <meta property="og:video" content="https://player.example.org/embed/42">
</head><body>
  <p id="bio-text">Punk aus
     Berlin.</p>
  <ol id="band-links">
    <li><a href="https://social.example.org/diekatze">Social</a></li>
    <li><a href="">leer</a></li>
  </ol>
</body></html>"#;

    fn candidate(name: &str, rank: usize) -> Candidate {
        Candidate {
            name: name.into(),
            url: format!("https://{}.example.org", rank),
            rank,
        }
    }

    #[test]
    fn test_parse_search_results() {
        let candidates = BandPageClient::parse_search_results(SEARCH_PAGE);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "Die Katzen");
        assert_eq!(candidates[1].name, "Die Katze");
        assert_eq!(candidates[1].url, "https://diekatze.example.org");
        assert_eq!(candidates[1].rank, 1);
    }

    #[test]
    fn test_parse_details() {
        let details = BandPageClient::parse_details(BAND_PAGE);
        assert_eq!(details.bio, "Punk aus Berlin.");
        assert_eq!(details.embed_url, "https://player.example.org/embed/42");
        assert_eq!(details.image_url.as_deref(), Some("https://img.example.org/katze.jpg"));
        assert_eq!(details.links.len(), 1);
        assert_eq!(details.links[0].kind, LINK_TYPE_RELATION);
        assert_eq!(details.links[0].description, "Social");
    }

    #[test]
    fn test_score_adds_rank_to_distance() {
        assert_eq!(score("die katze", &candidate("Die Katze", 0)), 0);
        assert_eq!(score("Die Katze", &candidate("Die Katzen", 0)), 1);
        assert_eq!(score("Die Katze", &candidate("Die Katze", 2)), 2);
    }

    #[test]
    fn test_best_candidate_respects_threshold() {
        let candidates = vec![candidate("Die Katzen", 0), candidate("Die Katze", 1)];
        // both score 1; the first one wins ties
        assert_eq!(best_candidate("Die Katze", &candidates, 1).unwrap().rank, 0);
        assert!(best_candidate("Die Katze", &candidates, 0).is_none());
        assert!(best_candidate("Trio Fatal", &candidates, 1).is_none());
        assert!(best_candidate("Trio Fatal", &[], 10).is_none());
    }

    struct FakeService {
        candidates: Vec<Candidate>,
        fail: bool,
        searches: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MetadataService for FakeService {
        async fn search(&self, name: &str, home: &str) -> Result<Vec<Candidate>> {
            self.searches.lock().unwrap().push(format!("{}|{}", name, home));
            if self.fail {
                return Err(ScraperError::Api {
                    message: "search down".into(),
                });
            }
            Ok(self.candidates.clone())
        }

        async fn details(&self, _candidate: &Candidate) -> Result<CandidateDetails> {
            Ok(BandPageClient::parse_details(BAND_PAGE))
        }
    }

    struct FakeMirror {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ImageMirror for FakeMirror {
        async fn mirror(&self, key: &str, _url: &str) -> Result<BTreeMap<String, String>> {
            if self.fail {
                return Err(ScraperError::Api {
                    message: "disk full".into(),
                });
            }
            Ok([(RENDITION_ORIGINAL.to_string(), format!("{}/original.jpg", key))]
                .into_iter()
                .collect())
        }
    }

    fn build_visitor(service: FakeService, mirror_fails: bool) -> (MetadataVisitor, Arc<FakeService>) {
        let service = Arc::new(service);
        let visitor = MetadataVisitor::new(
            service.clone(),
            Arc::new(FakeMirror { fail: mirror_fails }),
            1,
        );
        (visitor, service)
    }

    fn fake_service(fail: bool) -> FakeService {
        FakeService {
            candidates: vec![candidate("Die Katze", 0)],
            fail,
            searches: Mutex::new(Vec::new()),
        }
    }

    fn event_with(performers: Vec<Performer>) -> Event {
        Event {
            performers,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_accepted_candidate_fills_performer() {
        let (visitor, service) = build_visitor(fake_service(false), false);
        let mut katze = Performer::new("Die Katze", "Punk");
        katze.home = "Berlin".into();
        let mut event = event_with(vec![katze]);

        visitor.visit(&mut event).await.unwrap();

        let p = &event.performers[0];
        assert_eq!(p.listen_url, "https://0.example.org");
        assert_eq!(p.info, "Punk aus Berlin.");
        assert_eq!(p.embed_url, "https://player.example.org/embed/42");
        assert_eq!(p.links.len(), 1);
        assert_eq!(
            p.images.get(RENDITION_ORIGINAL).unwrap(),
            &format!("{}/original.jpg", image_key("Die Katze", "Punk"))
        );
        assert_eq!(*service.searches.lock().unwrap(), vec!["Die Katze|Berlin"]);
    }

    #[tokio::test]
    async fn test_skips_known_or_listenable_performers() {
        let (visitor, service) = build_visitor(fake_service(false), false);
        let mut known = Performer::new("Die Katze", "Punk");
        known.id = Some(1);
        let mut listenable = Performer::new("Die Katze", "Jazz");
        listenable.listen_url = "https://somewhere.example.org".into();
        let mut event = event_with(vec![known, listenable]);

        visitor.visit(&mut event).await.unwrap();

        assert!(service.searches.lock().unwrap().is_empty());
        assert_eq!(event.performers[1].listen_url, "https://somewhere.example.org");
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_performer_unchanged() {
        let (visitor, _) = build_visitor(fake_service(true), false);
        let original = Performer::new("Die Katze", "Punk");
        let mut event = event_with(vec![original.clone()]);

        visitor.visit(&mut event).await.unwrap();

        assert_eq!(event.performers[0], original);
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_other_fields() {
        let (visitor, _) = build_visitor(fake_service(false), true);
        let mut event = event_with(vec![Performer::new("Die Katze", "Punk")]);

        visitor.visit(&mut event).await.unwrap();

        let p = &event.performers[0];
        assert_eq!(p.info, "Punk aus Berlin.");
        assert!(p.images.is_empty());
    }
}
