//! A mounted page: its route, its HTML shell, and the factory that builds a
//! fresh root driver for every session.

use std::sync::Arc;

use liveview_core::constants::WS_ROUTE_SUFFIX;
use liveview_runtime::DriverNode;

/// Reference browser client, inlined into every shell.
const CLIENT_JS: &str = include_str!("../assets/client.js");

type RootFactory = Arc<dyn Fn() -> Arc<dyn DriverNode> + Send + Sync>;

/// One page served by the liveview server.
#[derive(Clone)]
pub struct Page {
    path: String,
    title: String,
    head: String,
    /// Root anchor id, read from one factory call at construction.
    anchor: String,
    factory: RootFactory,
}

impl Page {
    /// Create a page at `path`. `factory` builds the root driver each time a
    /// client connects.
    ///
    /// The path is normalised to start and end with `/`.
    pub fn new<F, N>(path: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<N> + Send + Sync + 'static,
        N: DriverNode,
    {
        let factory: RootFactory = Arc::new(move || -> Arc<dyn DriverNode> { factory() });
        let anchor = factory().anchor_id().to_owned();
        Self {
            path: normalize_path(path),
            title: "liveview".into(),
            head: String::new(),
            anchor,
            factory,
        }
    }

    /// Set the document title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Extra markup placed in `<head>` (stylesheets, meta tags).
    #[must_use]
    pub fn head(mut self, html: impl Into<String>) -> Self {
        self.head = html.into();
        self
    }

    /// Normalised route path, always ending in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The page's WebSocket route, `<path>ws_goliveview`.
    pub fn ws_path(&self) -> String {
        format!("{}{WS_ROUTE_SUFFIX}", self.path)
    }

    /// DOM id of the element the root driver fills.
    pub fn anchor_id(&self) -> &str {
        &self.anchor
    }

    /// Build a fresh root driver.
    pub fn build_root(&self) -> Arc<dyn DriverNode> {
        (self.factory)()
    }

    /// Render the HTML shell: the root anchor plus the client bootstrap.
    pub fn render_shell(&self) -> String {
        format!(
            concat!(
                "<!DOCTYPE html>\n",
                "<html>\n",
                "<head>\n",
                "<meta charset=\"utf-8\">\n",
                "<title>{title}</title>\n",
                "{head}\n",
                "</head>\n",
                "<body>\n",
                "<div id=\"{anchor}\"></div>\n",
                "<script data-ws=\"{ws}\">\n{client}</script>\n",
                "</body>\n",
                "</html>\n"
            ),
            title = escape_html(&self.title),
            head = self.head,
            anchor = escape_html(&self.anchor),
            ws = escape_html(&self.ws_path()),
            client = CLIENT_JS,
        )
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("path", &self.path)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
