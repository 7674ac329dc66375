//! HTML pages shown in the user's browser after an authorization redirect.

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:32rem;margin:4rem auto;\
padding:0 1rem;color:#1f2328}h1{font-size:1.4rem}.ok{color:#1a7f37}.err{color:#cf222e}";

/// Page confirming the workspace was connected.
pub fn success_page(workspace_name: &str) -> String {
    render(
        "Authorization complete",
        &format!(
            "<h1 class=\"ok\">Connected to {}</h1><p>You can close this window.</p>",
            escape(workspace_name)
        ),
    )
}

/// Page explaining why the authorization failed.
pub fn error_page(message: &str) -> String {
    render(
        "Authorization failed",
        &format!(
            "<h1 class=\"err\">Authorization failed</h1><p>{}</p><p>Please start again.</p>",
            escape(message)
        ),
    )
}

fn render(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>{STYLE}</style></head><body>{body}</body></html>"
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
