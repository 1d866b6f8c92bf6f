use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hackaplan_core::error::AppError;
use hackaplan_core::traits::Fetcher;

pub const HACKATHON: &str = "https://example.devpost.com";

/// Serves canned HTML by exact URL; anything else is a 404.
#[derive(Clone, Default)]
pub struct FixtureFetcher {
    pages: Arc<HashMap<String, String>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FixtureFetcher {
    pub fn new(pages: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
            log: Arc::default(),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Fetcher for FixtureFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, AppError> {
        self.log.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpStatus {
                status: 404,
                url: url.to_string(),
                retry_after: None,
            })
    }
}

pub fn listing_html(name: &str) -> String {
    format!(
        r#"<html><head><title>{name}: Build something - Devpost</title></head>
        <body><nav><a href="/project-gallery">Project gallery</a></nav></body></html>"#
    )
}

/// A gallery card; `winner` adds the badge.
pub fn gallery_item(slug: &str, title: &str, winner: bool) -> String {
    let badge = if winner {
        r#"<aside class="entry-badge"><img class="winner" alt="Winner"></aside>"#
    } else {
        ""
    };
    format!(
        r#"<div class="gallery-item" data-software-id="id-{slug}">
          <a class="block-wrapper-link" href="https://devpost.com/software/{slug}">
            <img src="//cdn.devpost.test/{slug}.png"><h5>{title}</h5>
          </a>{badge}
        </div>"#
    )
}

pub fn gallery_html(items: &[String], next: Option<&str>) -> String {
    let pagination = next
        .map(|href| format!(r#"<ul class="pagination"><li><a rel="next" href="{href}">Next</a></li></ul>"#))
        .unwrap_or_default();
    format!("<html><body>{}{pagination}</body></html>", items.join("\n"))
}

/// A project page; `prize` lists it as a winner of the example hackathon.
pub fn project_html(title: &str, prize: Option<&str>) -> String {
    let submissions = prize
        .map(|prize| {
            format!(
                r#"<div id="submissions"><ul class="software-list-with-thumbnail"><li>
                  <div class="software-list-content">
                    <p><a href="{HACKATHON}/">Example Hack</a></p>
                    <ul class="no-bullet"><li><span class="winner label">Winner</span> {prize}</li></ul>
                  </div></li></ul></div>"#
            )
        })
        .unwrap_or_default();
    format!(
        r#"<html><head>
        <meta property="og:title" content="{title}">
        <meta property="og:description" content="{title} tagline">
        </head><body>
        <div id="app-details-left"><h2>What it does</h2><p>{title} does things.</p></div>
        <div id="built-with"><ul><li><span class="cp-tag">rust</span></li></ul></div>
        {submissions}
        </body></html>"#
    )
}

pub fn software_url(slug: &str) -> String {
    format!("https://devpost.com/software/{slug}")
}
