//! HTML rendering. The whole page is rebuilt from the session on every request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::config::ServerConfig;
use crate::session::SessionContext;

const STYLE: &str = r#"
body { font-family: sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; color: #262730; }
.caption { color: #808495; font-size: 0.9rem; }
.success { background: #e8f9ee; color: #177233; padding: 0.75rem 1rem; border-radius: 0.5rem; }
.error { background: #fdecea; color: #7d1a12; padding: 0.75rem 1rem; border-radius: 0.5rem; }
.msg { padding: 0.6rem 0.9rem; margin: 0.4rem 0; border-radius: 0.8rem; white-space: pre-wrap; max-width: 80%; }
.msg.user { background: #dcf1ff; margin-left: auto; }
.msg.assistant { background: #f0f2f6; }
.transcript { display: flex; flex-direction: column; }
form.inline { display: inline-block; margin-right: 0.5rem; }
input[name=prompt] { width: 75%; padding: 0.5rem; }
"#;

/// `data:` URL embedding the PDF bytes for an inline preview
pub fn pdf_data_url(bytes: &[u8]) -> String {
    format!("data:application/pdf;base64,{}", STANDARD.encode(bytes))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        encode_text(title)
    )
}

/// Render the chat page for `ctx`
pub fn render_page(server: &ServerConfig, ctx: &SessionContext) -> String {
    let mut body = String::new();
    body.push_str(&format!("<h1>{}</h1>\n", encode_text(&server.title)));
    body.push_str(&format!(
        "<p class=\"caption\">{}</p>\n",
        encode_text(&server.caption)
    ));

    body.push_str("<h2>PDF Upload</h2>\n");
    body.push_str(concat!(
        "<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\n",
        "<label>Upload a PDF file <input type=\"file\" name=\"file\" accept=\".pdf,application/pdf\"></label>\n",
        "<button type=\"submit\">Upload</button>\n",
        "</form>\n"
    ));

    if let Some(upload) = &ctx.upload {
        body.push_str("<h3>PDF Preview</h3>\n");
        body.push_str(&format!(
            "<iframe src=\"{}\" title=\"{}\" width=\"100%\" height=\"400\" type=\"application/pdf\"></iframe>\n",
            pdf_data_url(&upload.bytes),
            encode_double_quoted_attribute(&upload.file_name)
        ));
        if !ctx.pdf_added {
            body.push_str(
                "<form method=\"post\" action=\"/add\"><button type=\"submit\">Add to Knowledge Base</button></form>\n",
            );
        }
    }

    if let Some(notice) = &ctx.notice {
        body.push_str(&format!("<p class=\"success\">{}</p>\n", encode_text(notice)));
    }

    body.push_str("<h2>Chat</h2>\n<div class=\"transcript\">\n");
    for turn in &ctx.messages {
        body.push_str(&format!(
            "<div class=\"msg {}\">{}</div>\n",
            turn.role.as_str(),
            encode_text(&turn.content)
        ));
    }
    body.push_str("</div>\n");

    body.push_str(concat!(
        "<form method=\"post\" action=\"/chat\">\n",
        "<input type=\"text\" name=\"prompt\" placeholder=\"Ask a question about the PDF\" autocomplete=\"off\" required>\n",
        "<button type=\"submit\">Send</button>\n",
        "</form>\n",
        "<p>\n",
        "<form class=\"inline\" method=\"post\" action=\"/clear\"><button type=\"submit\">Clear Chat History</button></form>\n",
        "<form class=\"inline\" method=\"post\" action=\"/new-upload\"><button type=\"submit\">Upload a new PDF</button></form>\n",
        "</p>\n"
    ));

    page(&server.title, &body)
}

/// Generic failure page; the session is unchanged so going back is always safe
pub fn render_error(title: &str, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p class=\"error\">Something went wrong: {}</p>\n<p><a href=\"/\">Back to the chat</a></p>\n",
        encode_text(title),
        encode_text(message)
    );
    page(title, &body)
}
