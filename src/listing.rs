//! Listing extraction: parsed page + selectors -> `MediaSummary` records.
//!
//! Everything here is pure. Nodes missing a title or link are skipped and
//! counted; they never abort the listing.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::document::{first_number, find_year, Document, Node, Pattern, Sel};
use crate::model::{DubStatus, MediaKind, MediaSummary};

/// Title markers of a Spanish dub.
const DUB_MARKERS: &[&str] = &["latino", "castellano"];

fn default_link_attr() -> String {
    "href".to_string()
}

fn default_poster_attrs() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string()]
}

/// A regex replacement applied to raw links before they are made absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRewrite {
    pub pattern: Pattern,
    #[serde(default)]
    pub replace: String,
}

/// Where the fields of one listing entry live. Every selector except `item`
/// is relative to the item node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    pub item: Sel,
    /// Defaults to the item node itself when absent.
    #[serde(default)]
    pub title: Option<Sel>,
    /// Read the title from this attribute instead of the node text.
    #[serde(default)]
    pub title_attr: Option<String>,
    /// Defaults to the item node itself when absent.
    #[serde(default)]
    pub link: Option<Sel>,
    #[serde(default = "default_link_attr")]
    pub link_attr: String,
    #[serde(default)]
    pub poster: Option<Sel>,
    #[serde(default = "default_poster_attrs")]
    pub poster_attrs: Vec<String>,
    #[serde(default)]
    pub year: Option<Sel>,
    /// Text of a "type" badge, matched against the markers below.
    #[serde(default)]
    pub kind: Option<Sel>,
    /// Latest episode badge, for "recently updated" strips.
    #[serde(default)]
    pub episode: Option<Sel>,
    #[serde(flatten)]
    pub kinds: KindMarkers,
    #[serde(default)]
    pub link_rewrites: Vec<LinkRewrite>,
}

/// URL or badge substrings that select a [`MediaKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMarkers {
    #[serde(default)]
    pub movie_markers: Vec<String>,
    #[serde(default)]
    pub live_markers: Vec<String>,
    #[serde(default)]
    pub default_kind: MediaKind,
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<MediaSummary>,
    /// Nodes dropped for lacking a title or a usable link.
    pub skipped: usize,
}

/// `Dubbed` when the title carries a dub marker, `Subbed` otherwise.
pub fn classify_dub(title: &str) -> DubStatus {
    let lower = title.to_lowercase();
    if DUB_MARKERS.iter().any(|m| lower.contains(m)) {
        DubStatus::Dubbed
    } else {
        DubStatus::Subbed
    }
}

/// Make `href` absolute against `base`. Absolute http(s) links come back
/// unchanged; anything else that is not a web link yields `None`.
pub fn normalize_url(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if let Ok(abs) = Url::parse(href) {
        return matches!(abs.scheme(), "http" | "https").then(|| href.to_string());
    }
    let joined = base.join(href).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

/// Pick a kind from URL and badge text. Live markers win over movie markers.
pub fn infer_kind(url: &str, badge: Option<&str>, markers: &KindMarkers) -> MediaKind {
    let haystacks: Vec<String> = std::iter::once(url)
        .chain(badge)
        .map(str::to_lowercase)
        .collect();
    let hit = |markers: &[String]| {
        markers.iter().any(|m| {
            let m = m.to_lowercase();
            haystacks.iter().any(|h| h.contains(&m))
        })
    };

    if hit(&markers.live_markers) {
        MediaKind::Live
    } else if hit(&markers.movie_markers) {
        MediaKind::Movie
    } else {
        markers.default_kind
    }
}

fn rewrite_link(raw: &str, rewrites: &[LinkRewrite]) -> String {
    rewrites.iter().fold(raw.to_string(), |acc, rw| {
        rw.pattern
            .regex()
            .replace_all(&acc, rw.replace.as_str())
            .into_owned()
    })
}

/// Poster URL of `node` via the ordered attribute fallbacks.
pub(crate) fn poster_of(node: &Node<'_>, sel: Option<&Sel>, attrs: &[String], base: &Url) -> Option<String> {
    let img = match sel {
        Some(sel) => node.select_first(sel)?,
        None => *node,
    };
    img.first_attr(attrs).and_then(|src| normalize_url(src, base))
}

fn extract_item(node: &Node<'_>, sel: &ListingSelectors, base: &Url) -> Option<MediaSummary> {
    let title_node = match &sel.title {
        Some(title) => node.select_first(title)?,
        None => *node,
    };
    let title = title_node.value_of(sel.title_attr.as_deref())?;

    let link_node = match &sel.link {
        Some(link) => node.select_first(link)?,
        None => *node,
    };
    let raw = link_node.attr(&sel.link_attr)?;
    let url = normalize_url(&rewrite_link(raw, &sel.link_rewrites), base)?;

    let poster_url = poster_of(node, sel.poster.as_ref(), &sel.poster_attrs, base);
    let year = sel
        .year
        .as_ref()
        .and_then(|y| node.select_first(y))
        .and_then(|y| find_year(&y.text()));
    let badge = sel
        .kind
        .as_ref()
        .and_then(|k| node.select_first(k))
        .map(|k| k.text());
    let latest_episode = sel
        .episode
        .as_ref()
        .and_then(|e| node.select_first(e))
        .and_then(|e| first_number(&e.text()));

    Some(MediaSummary {
        kind: infer_kind(&url, badge.as_deref(), &sel.kinds),
        dub_status: classify_dub(&title),
        url,
        title,
        poster_url,
        year,
        latest_episode,
    })
}

/// Map every `item` node of `doc` to a summary.
pub fn extract_listing(doc: &Document, selectors: &ListingSelectors, base: &Url) -> Listing {
    collect(doc.select(&selectors.item), selectors, base)
}

fn collect(nodes: Vec<Node<'_>>, selectors: &ListingSelectors, base: &Url) -> Listing {
    let mut listing = Listing::default();
    for node in nodes {
        match extract_item(&node, selectors, base) {
            Some(item) => listing.items.push(item),
            None => listing.skipped += 1,
        }
    }
    if listing.skipped > 0 {
        debug!(
            kept = listing.items.len(),
            skipped = listing.skipped,
            selector = selectors.item.as_str(),
            "Skipped listing nodes without title or link"
        );
    }
    listing
}

/// Same as [`extract_listing`] scoped to the first `scope` node, for pages
/// that carry several strips.
pub fn extract_listing_in(doc: &Document, scope: &Sel, selectors: &ListingSelectors, base: &Url) -> Listing {
    match doc.select_first(scope) {
        Some(root) => collect(root.select(&selectors.item), selectors, base),
        None => Listing::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors(toml_src: &str) -> ListingSelectors {
        toml::from_str(toml_src).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://x.com").unwrap()
    }

    const CARDS: &str = r#"
        <ul class="ListAnimes">
          <li><article>
            <a href="/anime/naruto"><img data-src="/img/naruto.jpg" src="/lazy.gif"></a>
            <h3 class="Title">Naruto</h3><span class="Type">Anime</span><span class="Year">2002</span>
          </article></li>
          <li><article>
            <a href="https://cdn.y.com/anime/one-piece-latino"><img src="/img/op.jpg"></a>
            <h3 class="Title">One Piece Latino</h3><span class="Type">Película</span>
          </article></li>
          <li><article><a href="/anime/no-title"></a></article></li>
          <li><article><h3 class="Title">No link</h3></article></li>
        </ul>"#;

    fn card_selectors() -> ListingSelectors {
        selectors(
            r#"
            item = "ul.ListAnimes li article"
            title = "h3.Title"
            link = "a"
            poster = "img"
            year = ".Year"
            kind = ".Type"
            movie_markers = ["película", "/pelicula/"]
            "#,
        )
    }

    #[test]
    fn dub_markers() {
        assert_eq!(classify_dub("Naruto Latino"), DubStatus::Dubbed);
        assert_eq!(classify_dub("Naruto Subtitulado"), DubStatus::Subbed);
        assert_eq!(classify_dub("Naruto"), DubStatus::Subbed);
        assert_eq!(classify_dub("Dragon Ball (CASTELLANO)"), DubStatus::Dubbed);
    }

    #[test]
    fn normalize_relative_and_absolute() {
        assert_eq!(normalize_url("/path", &base()).as_deref(), Some("https://x.com/path"));
        assert_eq!(
            normalize_url("https://y.com/p", &base()).as_deref(),
            Some("https://y.com/p")
        );
        assert_eq!(
            normalize_url("//cdn.x.com/a.jpg", &base()).as_deref(),
            Some("https://cdn.x.com/a.jpg")
        );
        assert_eq!(normalize_url("javascript:void(0)", &base()), None);
        assert_eq!(normalize_url("  ", &base()), None);
    }

    #[test]
    fn extracts_cards_and_counts_skips() {
        let doc = Document::from_html(CARDS);
        let listing = extract_listing(&doc, &card_selectors(), &base());

        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.skipped, 2);

        let naruto = &listing.items[0];
        assert_eq!(naruto.url, "https://x.com/anime/naruto");
        assert_eq!(naruto.poster_url.as_deref(), Some("https://x.com/img/naruto.jpg"));
        assert_eq!(naruto.year, Some(2002));
        assert_eq!(naruto.kind, MediaKind::Series);
        assert_eq!(naruto.dub_status, DubStatus::Subbed);

        let op = &listing.items[1];
        assert_eq!(op.url, "https://cdn.y.com/anime/one-piece-latino");
        assert_eq!(op.kind, MediaKind::Movie);
        assert_eq!(op.dub_status, DubStatus::Dubbed);
        assert_eq!(op.year, None);
    }

    #[test]
    fn link_rewrites_apply_before_normalization() {
        let html = r#"<ul class="ListEpisodios"><li><a href="/ver/naruto-220">
            <strong class="Title">Naruto</strong><span class="Capi">Episodio 220</span></a></li></ul>"#;
        let sel = selectors(
            r#"
            item = "ul.ListEpisodios li a"
            title = "strong.Title"
            episode = ".Capi"
            link_rewrites = [
              { pattern = "-\\d+$", replace = "" },
              { pattern = "^/ver/", replace = "/anime/" },
            ]
            "#,
        );
        let listing = extract_listing(&Document::from_html(html), &sel, &base());
        assert_eq!(listing.items[0].url, "https://x.com/anime/naruto");
        assert_eq!(listing.items[0].latest_episode, Some(220));
    }

    #[test]
    fn live_marker_beats_movie_marker() {
        let markers = KindMarkers {
            movie_markers: vec!["tv".into()],
            live_markers: vec!["/canal/".into()],
            default_kind: MediaKind::Series,
        };
        assert_eq!(infer_kind("https://x.com/canal/tv-1", None, &markers), MediaKind::Live);
        assert_eq!(infer_kind("https://x.com/tv-1", None, &markers), MediaKind::Movie);
        assert_eq!(infer_kind("https://x.com/show", Some("Serie"), &markers), MediaKind::Series);
        assert_eq!(infer_kind("https://x.com/show", Some("TV"), &markers), MediaKind::Movie);
    }

    #[test]
    fn scoped_extraction_ignores_other_strips() {
        let html = r#"<div id="a"><a href="/1">One</a></div><div id="b"><a href="/2">Two</a></div>"#;
        let sel = selectors("item = \"a\"");
        let doc = Document::from_html(html);
        let scoped = extract_listing_in(&doc, &Sel::parse("#b").unwrap(), &sel, &base());
        assert_eq!(scoped.items.len(), 1);
        assert_eq!(scoped.items[0].title, "Two");
        assert_eq!(scoped.items[0].url, "https://x.com/2");
    }
}
