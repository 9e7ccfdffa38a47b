//! Title pages and paginated episode endpoints, end to end.

use std::sync::Arc;

use cinescrape::{Config, ContentSource, ExtractorChain, Pipeline};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TITLE_PAGE: &str = r#"
<html><body>
  <h1 class="Title">Naruto</h1>
  <div id="guardar-anime" data-anime="1234"></div>
</body></html>"#;

fn pipeline(server: &MockServer) -> Pipeline {
    let text = format!(
        r##"
[fetch]
backoff_ms = 1
max_retries = 0

[[sites]]
name = "jkanime"
base_url = "{uri}"
challenge = false

[sites.capabilities]
search = false

[sites.listing]
item = "div.anime"

[sites.detail]
title = "h1.Title"
order = "descending"

[sites.detail.episodes]
type = "paginated"
url_template = "{{base}}ajax/episodes/{{id}}/{{page}}/"
id_selector = "#guardar-anime"
id_attr = "data-anime"
items_pointer = "/data"
next_pointer = "/next_page_url"
link_template = "{{url}}/{{n}}"
"##,
        uri = server.uri()
    );
    let config = Config::from_toml(&text, "inline").unwrap();
    Pipeline::new(config.sites[0].clone(), &config.fetch, Arc::new(ExtractorChain::standard())).unwrap()
}

fn numbers(range: impl Iterator<Item = u32>) -> Vec<serde_json::Value> {
    range.map(|n| json!({ "number": n })).collect()
}

async fn mount_title(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/anime/naruto"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TITLE_PAGE, "text/html"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn two_pages_give_ascending_episodes() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/ajax/episodes/1234/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": numbers((6..=25).rev()),
            "next_page_url": "/ajax/episodes/1234/2/"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ajax/episodes/1234/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": numbers((1..=5).rev()),
            "next_page_url": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/anime/naruto", server.uri());
    let detail = pipeline(&server).get_detail(&url).await.unwrap();

    assert_eq!(detail.title, "Naruto");
    assert!(!detail.partial);
    let order: Vec<u32> = detail.episodes.iter().filter_map(|e| e.episode_number).collect();
    assert_eq!(order, (1..=25).collect::<Vec<_>>());
    assert_eq!(detail.episodes[0].load_token, format!("{url}/1"));
    assert_eq!(detail.episodes[0].display_name, "Episodio 1");
}

#[tokio::test]
async fn failed_page_keeps_earlier_episodes() {
    let server = MockServer::start().await;
    mount_title(&server).await;
    Mock::given(method("GET"))
        .and(path("/ajax/episodes/1234/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": numbers((6..=25).rev()),
            "next_page_url": "/ajax/episodes/1234/2/"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ajax/episodes/1234/2/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/anime/naruto", server.uri());
    let detail = pipeline(&server).get_detail(&url).await.unwrap();

    assert!(detail.partial);
    assert_eq!(detail.episodes.len(), 20);
    assert_eq!(detail.episodes.first().and_then(|e| e.episode_number), Some(6));
}

#[tokio::test]
async fn missing_title_page_is_an_error() {
    let server = MockServer::start().await;
    let url = format!("{}/anime/absent", server.uri());
    assert!(pipeline(&server).get_detail(&url).await.is_err());
}

fn pipeline_with(server: &MockServer, detail: &str) -> Pipeline {
    let text = format!(
        r#"
[fetch]
backoff_ms = 1
max_retries = 0

[[sites]]
name = "hdfull"
base_url = "{uri}"
challenge = false

[sites.capabilities]
search = false

[sites.listing]
item = "div.item"

{detail}
"#,
        uri = server.uri()
    );
    let config = Config::from_toml(&text, "inline").unwrap();
    Pipeline::new(config.sites[0].clone(), &config.fetch, Arc::new(ExtractorChain::standard())).unwrap()
}

const SEASONS: &str = r#"
[sites.detail]
title = "h1"

[sites.detail.episodes]
type = "season_posts"
season_selector = "div.seasons a"
season_attr = "title"
sid_start = "var sid = '"
sid_end = "';"
endpoint = "{base}a/episodes"
link_template = "{url}/temporada-{season}/episodio-{n}"

[sites.detail.episodes.form]
action = "season"
sid = "{sid}"
season = "{season}"
"#;

const SHOW_PAGE: &str = r#"
<html><body>
  <h1>Dark</h1>
  <script>var sid = '77';</script>
  <div class="seasons"><a title="Temporada 1"></a><a title="Temporada 2"></a><a title="Temporada 3"></a></div>
</body></html>"#;

async fn mount_show(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/show/dark"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SHOW_PAGE, "text/html"))
        .mount(server)
        .await;
}

async fn mount_season(server: &MockServer, season: u32, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/a/episodes"))
        .and(body_string_contains(format!("season={season}")))
        .and(body_string_contains("sid=77"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn seasons_join_in_season_order() {
    let server = MockServer::start().await;
    mount_show(&server).await;
    mount_season(
        &server,
        1,
        ResponseTemplate::new(200)
            .set_delay(std::time::Duration::from_millis(200))
            .set_body_json(json!([{ "episode": 1 }, { "episode": 2 }])),
    )
    .await;
    mount_season(&server, 2, ResponseTemplate::new(200).set_body_json(json!([{ "episode": 1 }]))).await;
    // The special has no number, so the joined order is left as fetched.
    mount_season(
        &server,
        3,
        ResponseTemplate::new(200).set_body_json(json!([{ "title": "Especial" }])),
    )
    .await;

    let url = format!("{}/show/dark", server.uri());
    let detail = pipeline_with(&server, SEASONS).get_detail(&url).await.unwrap();

    assert!(!detail.partial);
    let seasons: Vec<Option<u32>> = detail.episodes.iter().map(|e| e.season_number).collect();
    assert_eq!(seasons, [Some(1), Some(1), Some(2), Some(3)]);
    assert_eq!(detail.episodes[1].load_token, format!("{url}/temporada-1/episodio-2"));
}

#[tokio::test]
async fn failed_season_marks_detail_partial() {
    let server = MockServer::start().await;
    mount_show(&server).await;
    mount_season(&server, 1, ResponseTemplate::new(200).set_body_json(json!([{ "episode": 1 }]))).await;
    mount_season(&server, 2, ResponseTemplate::new(500)).await;
    mount_season(&server, 3, ResponseTemplate::new(200).set_body_json(json!([{ "episode": 1 }]))).await;

    let url = format!("{}/show/dark", server.uri());
    let detail = pipeline_with(&server, SEASONS).get_detail(&url).await.unwrap();

    assert!(detail.partial);
    let seasons: Vec<Option<u32>> = detail.episodes.iter().map(|e| e.season_number).collect();
    assert_eq!(seasons, [Some(1), Some(3)]);
}

const TOKEN_GUARDED: &str = r##"
[sites.detail]
title = "h1"

[sites.detail.episodes]
type = "paginated"
url_template = "{base}ajax/episodes"
method = "POST"
id_selector = "#anime"
id_attr = "data-id"
items_pointer = "/data"
next_pointer = "/more"
link_template = "{url}/{n}"

[sites.detail.episodes.form]
anime = "{id}"
page = "{page}"

[sites.detail.episodes.token]
page = "{base}csrf"
"##;

async fn mount_guarded_show(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/anime/dorama"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><body><h1>Dorama</h1><div id="anime" data-id="42"></div></body></html>"#,
            "text/html",
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/csrf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><head><meta name="csrf-token" content="tok"></head></html>"#,
            "text/html",
        ))
        .expect(2)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ajax/episodes"))
        .and(body_string_contains("page=1"))
        .and(body_string_contains("_token=tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": numbers(1..=10),
            "more": true
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn expired_token_is_refreshed_once() {
    let server = MockServer::start().await;
    mount_guarded_show(&server).await;
    Mock::given(method("POST"))
        .and(path("/ajax/episodes"))
        .and(body_string_contains("page=2"))
        .respond_with(ResponseTemplate::new(419))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ajax/episodes"))
        .and(body_string_contains("page=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": numbers(11..=12),
            "more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/anime/dorama", server.uri());
    let detail = pipeline_with(&server, TOKEN_GUARDED).get_detail(&url).await.unwrap();

    assert!(!detail.partial);
    assert_eq!(detail.episodes.len(), 12);
    assert_eq!(detail.episodes.last().and_then(|e| e.episode_number), Some(12));
}

#[tokio::test]
async fn persistent_419_keeps_first_page() {
    let server = MockServer::start().await;
    mount_guarded_show(&server).await;
    Mock::given(method("POST"))
        .and(path("/ajax/episodes"))
        .and(body_string_contains("page=2"))
        .respond_with(ResponseTemplate::new(419))
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}/anime/dorama", server.uri());
    let detail = pipeline_with(&server, TOKEN_GUARDED).get_detail(&url).await.unwrap();

    assert!(detail.partial);
    assert_eq!(detail.episodes.len(), 10);
    assert_eq!(detail.episodes.first().and_then(|e| e.episode_number), Some(1));
}
