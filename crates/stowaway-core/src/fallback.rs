//! The page served when a navigation can be answered by neither the cache
//! nor the network. Everything is inline: no stylesheet, image or script is
//! fetched to render it.

use crate::response::Response;

const OFFLINE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Offline - {app_name}</title>
    <style>
        body { font-family: Arial, sans-serif; text-align: center; padding: 50px; }
        .offline-message { color: #666; }
    </style>
</head>
<body>
    <h1>You're Offline</h1>
    <p class="offline-message">Please check your internet connection and try again.</p>
    <button onclick="location.reload()">Retry</button>
</body>
</html>
"#;

/// Build the offline document for an application called `app_name`.
pub fn offline_page(app_name: &str) -> Response {
    Response::html(OFFLINE_TEMPLATE.replace("{app_name}", &escape_html(app_name)))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
