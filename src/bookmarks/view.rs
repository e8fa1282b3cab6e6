//! Server-rendered pages. The bookmark page also ships a small script that
//! follows `/events` and redraws the list from each snapshot.

use crate::model::{Bookmark, User};

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn layout(body: &str, user: Option<&User>) -> String {
    let account = match user {
        Some(user) => format!(r#"<span class="account">{}</span>"#, escape(user.display_name())),
        None => String::new(),
    };

    format!(
        r#"<!doctype html>
<html>
    <head>
        <meta charset="utf-8">
        <title>Smart Bookmark Manager</title>
    </head>
    <body>
        <header><h1>Smart Bookmark Manager</h1>{account}</header>
        <main>{body}</main>
        <footer><p>Built with Rust, axum and libsql</p></footer>
    </body>
</html>
"#
    )
}

pub fn landing() -> String {
    let body = r#"
            <h2>Welcome to Smart Bookmark Manager</h2>
            <p>Sign in to start saving and organizing your bookmarks</p>
            <h3>Features:</h3>
            <ul>
                <li>Save bookmarks with titles and URLs</li>
                <li>Private bookmarks - only you can see them</li>
                <li>Real-time sync across all your devices</li>
                <li>Easy delete functionality</li>
            </ul>
"#;
    layout(body, None)
}

/// Only http(s) urls become links; anything else, `javascript:` included,
/// is shown as text.
pub fn is_web_link(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    url.starts_with("http://") || url.starts_with("https://")
}

fn url_markup(url: &str) -> String {
    let url_text = escape(url);
    if is_web_link(url) {
        format!(r#"<a href="{url_text}" target="_blank" rel="noopener noreferrer">{url_text}</a>"#)
    } else {
        format!(r#"<span class="url">{url_text}</span>"#)
    }
}

fn bookmark_item(bookmark: &Bookmark) -> String {
    format!(
        r#"
                <li data-id="{id}">
                    <h3>{title}</h3>
                    {url}
                    <p>{date}</p>
                    <form action="/bookmarks/{id}/delete" method="post">
                        <button type="submit">Delete</button>
                    </form>
                </li>"#,
        id = escape(&bookmark.id),
        title = escape(&bookmark.title),
        url = url_markup(&bookmark.url),
        date = bookmark.created_at.format("%Y-%m-%d"),
    )
}

pub fn bookmark_list(bookmarks: &[Bookmark]) -> String {
    if bookmarks.is_empty() {
        return r#"<p class="empty">No bookmarks yet. Add your first bookmark above!</p>"#.to_string();
    }
    let items: String = bookmarks.iter().map(bookmark_item).collect();
    format!("<ul>{items}\n            </ul>")
}

const LIVE_SCRIPT: &str = r#"
        <script>
            const list = document.getElementById("bookmarks");
            const count = document.getElementById("count");
            const source = new EventSource("/events");
            source.addEventListener("snapshot", (e) => {
                const snap = JSON.parse(e.data);
                if (snap.status !== "ready") return;
                count.textContent = snap.bookmarks.length;
                list.replaceChildren();
                if (snap.bookmarks.length === 0) {
                    const p = document.createElement("p");
                    p.className = "empty";
                    p.textContent = "No bookmarks yet. Add your first bookmark above!";
                    list.appendChild(p);
                    return;
                }
                const ul = document.createElement("ul");
                for (const b of snap.bookmarks) {
                    const li = document.createElement("li");
                    li.dataset.id = b.id;
                    const h = document.createElement("h3");
                    h.textContent = b.title;
                    let a;
                    if (/^\s*https?:\/\//i.test(b.url)) {
                        a = document.createElement("a");
                        a.href = b.url;
                        a.target = "_blank";
                        a.rel = "noopener noreferrer";
                    } else {
                        a = document.createElement("span");
                        a.className = "url";
                    }
                    a.textContent = b.url;
                    const p = document.createElement("p");
                    p.textContent = b.created_at.slice(0, 10);
                    const form = document.createElement("form");
                    form.method = "post";
                    form.action = "/bookmarks/" + encodeURIComponent(b.id) + "/delete";
                    const button = document.createElement("button");
                    button.type = "submit";
                    button.textContent = "Delete";
                    form.appendChild(button);
                    li.append(h, a, p, form);
                    ul.appendChild(li);
                }
                list.appendChild(ul);
            });
        </script>
"#;

pub fn bookmarks_page(user: &User, bookmarks: &[Bookmark], notice: Option<&str>) -> String {
    let notice = match notice {
        Some(msg) if !msg.is_empty() => format!(r#"<div class="notice" role="alert">{}</div>"#, escape(msg)),
        _ => String::new(),
    };

    let body = format!(
        r#"
            {notice}
            <form action="/bookmarks" method="post">
                <h2>Add New Bookmark</h2>
                <label>Title <input type="text" name="title" placeholder="Enter bookmark title" required></label>
                <label>URL <input type="url" name="url" placeholder="https://example.com" required></label>
                <button type="submit">Add Bookmark</button>
            </form>
            <h2>My Bookmarks (<span id="count">{count}</span>)</h2>
            <div id="bookmarks">{list}</div>
            {LIVE_SCRIPT}"#,
        count = bookmarks.len(),
        list = bookmark_list(bookmarks),
    );
    layout(&body, Some(user))
}
