//! HTML extraction for Devpost hackathon, gallery and project pages.

use std::sync::LazyLock;

use hackaplan_core::error::AppError;
use hackaplan_core::models::{
    DescriptionSection, ExternalLink, GalleryEntry, GalleryPage, ListingPage, PrizeAward,
    TeamMember, TechTag, WinnerProject,
};
use hackaplan_core::traits::Extractor;
use hackaplan_core::urls::same_hackathon;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const SITE_ROOT: &str = "https://devpost.com";

macro_rules! selector {
    ($name:ident, $css:literal) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("invalid selector: ", $css)));
    };
}

selector!(TITLE, "title");
selector!(ANCHOR_WITH_HREF, "a[href]");
selector!(ANCHOR, "a");
selector!(PENDING_WINNERS_CTA, ".challenge-pre-winners-announced-primary-cta");
selector!(GALLERY_ITEM, "div.gallery-item");
selector!(SOFTWARE_LINK, "a.link-to-software");
selector!(WRAPPER_LINK, "a.block-wrapper-link");
selector!(ITEM_TITLE, "h5");
selector!(IMG, "img");
selector!(WINNER_BADGE, "aside.entry-badge .winner");
selector!(WINNER_LABEL, ".winner.label");
selector!(NEXT_PAGE, "ul.pagination a[rel='next']");
selector!(OG_TITLE, "meta[property='og:title']");
selector!(OG_DESCRIPTION, "meta[property='og:description']");
selector!(OG_IMAGE, "meta[property='og:image']");
selector!(H1, "h1");
selector!(H2, "h2");
selector!(DETAILS_LEFT, "#app-details-left");
selector!(BUILT_WITH_TAG, "#built-with .cp-tag");
selector!(APP_LINK, "nav.app-links a[href]");
selector!(TEAM_MEMBER, "#app-team li.software-team-member");
selector!(PROFILE_LINK, "a.user-profile-link[href]");
selector!(SUBMISSION, "#submissions ul.software-list-with-thumbnail > li");
selector!(CHALLENGE_LINK, ".software-list-content > p a[href]");
selector!(PRIZE_ITEM, ".software-list-content ul.no-bullet li");

/// Devpost page extractor built on `scraper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevpostExtractor;

impl DevpostExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for DevpostExtractor {
    fn parse_listing(&self, hackathon_url: &str, html: &str) -> Result<ListingPage, AppError> {
        let doc = Html::parse_document(html);
        Ok(ListingPage {
            name: hackathon_name(&doc),
            gallery_url: gallery_url(hackathon_url, &doc)?,
            winners_announced: winners_announced(&doc),
        })
    }

    fn parse_gallery(&self, page_url: &str, html: &str) -> Result<GalleryPage, AppError> {
        let doc = Html::parse_document(html);
        let base = parse_base(page_url)?;

        let mut page = GalleryPage::default();
        for item in doc.select(&GALLERY_ITEM) {
            page.scanned_projects += 1;

            let Some(href) = item
                .select(&SOFTWARE_LINK)
                .next()
                .or_else(|| item.select(&WRAPPER_LINK).next())
                .and_then(|link| link.value().attr("href"))
                .filter(|href| !href.trim().is_empty())
            else {
                continue;
            };
            let Ok(project_url) = base.join(href.trim()) else {
                continue;
            };

            let project_title = item
                .select(&ITEM_TITLE)
                .next()
                .map(|node| element_text(&node))
                .unwrap_or_else(|| "Untitled".to_string());

            page.entries.push(GalleryEntry {
                project_title,
                project_url: project_url.to_string(),
                software_id: item.value().attr("data-software-id").map(str::to_string),
                preview_image_url: preview_image(&item, &base),
                is_winner: item.select(&WINNER_BADGE).next().is_some()
                    || item.select(&WINNER_LABEL).next().is_some(),
            });
        }

        page.next_page_url = doc
            .select(&NEXT_PAGE)
            .next()
            .and_then(|link| link.value().attr("href"))
            .filter(|href| !href.is_empty() && *href != "#")
            .and_then(|href| base.join(href).ok())
            .map(|url| url.to_string());

        Ok(page)
    }

    fn parse_project(
        &self,
        project_url: &str,
        html: &str,
        hackathon_url: &str,
    ) -> Result<WinnerProject, AppError> {
        let doc = Html::parse_document(html);

        let project_title = meta_content(&doc, &OG_TITLE)
            .or_else(|| {
                doc.select(&H1)
                    .next()
                    .map(|h1| element_text(&h1))
                    .filter(|t| !t.is_empty())
            })
            .ok_or_else(|| {
                AppError::ParseError(format!("Unable to parse project title from {project_url}"))
            })?;

        Ok(WinnerProject {
            project_title,
            project_url: project_url.to_string(),
            tagline: meta_content(&doc, &OG_DESCRIPTION).map(|t| clean_text(&t)),
            preview_image_url: meta_content(&doc, &OG_IMAGE).map(|src| protocol_relative(&clean_text(&src))),
            prizes: prizes(&doc, hackathon_url),
            team_members: team_members(&doc),
            built_with: built_with(&doc),
            external_links: external_links(&doc),
            description_sections: description_sections(&doc),
            warning: None,
        })
    }
}

/// Collapse runs of whitespace into single spaces.
fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

fn parse_base(url: &str) -> Result<Url, AppError> {
    Url::parse(url).map_err(|e| AppError::ParseError(format!("Bad page URL '{url}': {e}")))
}

fn protocol_relative(src: &str) -> String {
    match src.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => src.to_string(),
    }
}

/// Join site-relative paths (`/foo`) against the site root.
fn site_absolute(href: &str) -> String {
    if href.starts_with('/') {
        Url::parse(SITE_ROOT)
            .and_then(|root| root.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    } else {
        href.to_string()
    }
}

fn meta_content(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::to_string)
        .filter(|content| !content.trim().is_empty())
}

fn hackathon_name(doc: &Html) -> String {
    let title = doc
        .select(&TITLE)
        .next()
        .map(|t| element_text(&t))
        .unwrap_or_default();
    if title.is_empty() {
        return "Unknown Hackathon".to_string();
    }
    let title = title.replace(" - Devpost", "");
    match title.split_once(':') {
        Some((name, _)) => clean_text(name),
        None => title,
    }
}

fn winners_announced(doc: &Html) -> bool {
    if doc.select(&PENDING_WINNERS_CTA).next().is_some() {
        return false;
    }
    let text = clean_text(&doc.root_element().text().collect::<Vec<_>>().join(" "));
    !text.to_lowercase().contains("winners announced soon")
}

fn gallery_url(hackathon_url: &str, doc: &Html) -> Result<String, AppError> {
    let base = parse_base(hackathon_url)?;
    let linked = doc
        .select(&ANCHOR_WITH_HREF)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("project-gallery"))
        .and_then(|href| base.join(href).ok());
    if let Some(url) = linked {
        return Ok(url.to_string());
    }

    let dir = if hackathon_url.ends_with('/') {
        hackathon_url.to_string()
    } else {
        format!("{hackathon_url}/")
    };
    parse_base(&dir)?
        .join("project-gallery")
        .map(|u| u.to_string())
        .map_err(|e| AppError::ParseError(format!("Cannot build gallery URL: {e}")))
}

fn preview_image(item: &ElementRef<'_>, base: &Url) -> Option<String> {
    let img = item.select(&IMG).next()?;
    let normalize = |raw: &str| {
        let cleaned = clean_text(raw);
        if cleaned.starts_with("//") {
            Some(protocol_relative(&cleaned))
        } else {
            base.join(&cleaned).ok().map(|u| u.to_string())
        }
    };

    for attr in ["src", "data-src", "data-cfsrc"] {
        if let Some(raw) = img.value().attr(attr).filter(|v| !v.trim().is_empty()) {
            return normalize(raw);
        }
    }

    let srcset = img.value().attr("srcset")?;
    let first = srcset.split(',').next()?.split_whitespace().next()?;
    normalize(first)
}

fn description_sections(doc: &Html) -> Vec<DescriptionSection> {
    let Some(left) = doc.select(&DETAILS_LEFT).next() else {
        return Vec::new();
    };

    let mut sections = Vec::new();
    for heading in left.select(&H2) {
        let heading_text = element_text(&heading);
        if heading_text.is_empty() {
            continue;
        }

        let parts: Vec<String> = heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take_while(|sibling| sibling.value().name() != "h2")
            .map(|sibling| element_text(&sibling))
            .filter(|text| !text.is_empty())
            .collect();

        if !parts.is_empty() {
            sections.push(DescriptionSection {
                heading: heading_text,
                content: parts.join("\n\n"),
            });
        }
    }
    sections
}

fn built_with(doc: &Html) -> Vec<TechTag> {
    doc.select(&BUILT_WITH_TAG)
        .filter_map(|tag| {
            let name = element_text(&tag);
            if name.is_empty() {
                return None;
            }
            let url = tag
                .select(&ANCHOR)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string);
            Some(TechTag { name, url })
        })
        .collect()
}

fn external_links(doc: &Html) -> Vec<ExternalLink> {
    doc.select(&APP_LINK)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let text = element_text(&anchor);
            let label = if text.is_empty() {
                Url::parse(href)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| href.to_string())
            } else {
                text
            };
            Some(ExternalLink {
                label,
                url: href.to_string(),
            })
        })
        .collect()
}

fn team_members(doc: &Html) -> Vec<TeamMember> {
    doc.select(&TEAM_MEMBER)
        .filter_map(|member| {
            let profile = member.select(&PROFILE_LINK).next()?;
            let name = element_text(&profile);
            if name.is_empty() {
                return None;
            }
            Some(TeamMember {
                name,
                profile_url: profile.value().attr("href").map(site_absolute),
            })
        })
        .collect()
}

/// Prizes listed on a project page, limited to the target hackathon.
fn prizes(doc: &Html, hackathon_url: &str) -> Vec<PrizeAward> {
    let mut prizes = Vec::new();
    for submission in doc.select(&SUBMISSION) {
        let Some(challenge) = submission.select(&CHALLENGE_LINK).next() else {
            continue;
        };
        let challenge_name = element_text(&challenge);
        let challenge_url = site_absolute(challenge.value().attr("href").unwrap_or_default());
        if challenge_url.is_empty() || !same_hackathon(hackathon_url, &challenge_url) {
            continue;
        }

        for item in submission.select(&PRIZE_ITEM) {
            let raw = element_text(&item);
            if raw.is_empty() {
                continue;
            }
            let stripped = raw.replace("Winner", "");
            let prize_name = match stripped.trim() {
                "" => raw.clone(),
                name => name.to_string(),
            };
            prizes.push(PrizeAward {
                hackathon_name: challenge_name.clone(),
                hackathon_url: Some(challenge_url.clone()),
                prize_name,
            });
        }
    }
    prizes
}
