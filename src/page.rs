//! 文件列表页与登录页的 HTML 渲染。

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write;

use crate::storage::StoredFile;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// 上传结果提示条。
#[derive(Clone, Debug)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #1f2328; color: #e6edf3; margin: 0; }
main { max-width: 800px; margin: 2rem auto; padding: 0 1rem; }
.drop { border: 2px dashed #666; border-radius: 10px; padding: 2rem; text-align: center; margin: 2rem 0; }
.file { display: flex; justify-content: space-between; align-items: center; padding: .75rem 1rem; border-bottom: 1px solid #30363d; }
.meta { color: #8b949e; font-size: .85rem; margin-left: 1rem; }
.notice { padding: 1rem; border-radius: 6px; margin-bottom: 1rem; }
.notice-success { background: #1a472a; }
.notice-error { background: #5a1e1e; }
a.button, button { background: #2563eb; color: #fff; border: 0; border-radius: 4px; padding: .35rem .8rem; text-decoration: none; cursor: pointer; }
"#;

const SCRIPT: &str = r#"
const KEY = 'fileVaultPassword';
let password = sessionStorage.getItem(KEY);

async function askPassword() {
  const value = window.prompt('Server password');
  if (!value) return false;
  const res = await fetch('/verify-password', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify({ password: value }),
  });
  if (!res.ok) { alert('Invalid password'); return false; }
  password = value;
  sessionStorage.setItem(KEY, value);
  return true;
}

function authHeaders() {
  return password ? { 'X-Password': password } : {};
}

async function upload(file) {
  const form = new FormData();
  form.append('file', file);
  const res = await fetch('/', { method: 'POST', headers: authHeaders(), body: form });
  if (res.status === 401) {
    sessionStorage.removeItem(KEY);
    password = null;
    if (await askPassword()) return upload(file);
    return;
  }
  if (!res.ok) { alert(await res.text()); return; }
  location.reload();
}

async function download(name) {
  const res = await fetch('/download/' + encodeURIComponent(name), { headers: authHeaders() });
  if (res.status === 401) {
    sessionStorage.removeItem(KEY);
    password = null;
    if (await askPassword()) return download(name);
    return;
  }
  if (!res.ok) { alert(await res.text()); return; }
  const url = URL.createObjectURL(await res.blob());
  const a = document.createElement('a');
  a.href = url;
  a.download = name;
  document.body.appendChild(a);
  a.click();
  a.remove();
  URL.revokeObjectURL(url);
}

const input = document.getElementById('file-input');
document.getElementById('upload-form').addEventListener('submit', (e) => {
  e.preventDefault();
  Array.from(input.files).forEach(upload);
});
document.addEventListener('dragover', (e) => e.preventDefault());
document.addEventListener('drop', (e) => {
  e.preventDefault();
  Array.from(e.dataTransfer.files).forEach(upload);
});
document.querySelectorAll('a[data-name]').forEach((link) => {
  link.addEventListener('click', (e) => {
    e.preventDefault();
    download(link.dataset.name);
  });
});
"#;

const LOGIN_SCRIPT: &str = r#"
(async () => {
  const KEY = 'fileVaultPassword';
  let password = sessionStorage.getItem(KEY);
  for (;;) {
    if (!password) {
      password = window.prompt('Server password');
      if (!password) return;
    }
    const res = await fetch('/', { headers: { 'X-Password': password, 'Accept': 'text/html' } });
    if (res.ok) {
      sessionStorage.setItem(KEY, password);
      document.open();
      document.write(await res.text());
      document.close();
      return;
    }
    sessionStorage.removeItem(KEY);
    password = null;
  }
})();
"#;

/// 文件列表页。
pub fn render_index(files: &[StoredFile], notice: Option<&Notice>) -> String {
    let mut html = String::with_capacity(4096 + files.len() * 256);
    html.push_str("<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">");
    html.push_str("<title>File Vault</title><style>");
    html.push_str(STYLE);
    html.push_str("</style></head><body><main><h1>File Vault</h1>");

    if let Some(notice) = notice {
        let class = match notice.kind {
            NoticeKind::Success => "notice-success",
            NoticeKind::Error => "notice-error",
        };
        let _ = write!(
            html,
            "<div class=\"notice {class}\">{}</div>",
            escape_html(&notice.text)
        );
    }

    html.push_str(
        "<form id=\"upload-form\" class=\"drop\" method=\"post\" enctype=\"multipart/form-data\">\
         <p>Drop files anywhere or choose one</p>\
         <input id=\"file-input\" type=\"file\" name=\"file\" required> \
         <button type=\"submit\">Upload</button></form>",
    );

    html.push_str("<h2>Stored Files</h2><div>");
    if files.is_empty() {
        html.push_str("<p>No files found</p>");
    }
    for file in files {
        let name = escape_html(&file.name);
        let href = utf8_percent_encode(&file.name, NON_ALPHANUMERIC);
        let modified = file.modified_display().unwrap_or_default();
        let _ = write!(
            html,
            "<div class=\"file\"><span>{name}<span class=\"meta\">{} &middot; {modified}</span></span>\
             <a class=\"button\" href=\"/download/{href}\" data-name=\"{name}\">Download</a></div>",
            human_size(file.size),
        );
    }
    html.push_str("</div></main><script>");
    html.push_str(SCRIPT);
    html.push_str("</script></body></html>");
    html
}

/// 共享密钥模式下未授权浏览器看到的页面：输入密码后重新加载列表。
pub fn render_login() -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\"><title>File Vault</title>\
         <style>{STYLE}</style></head><body><main><h1>File Vault</h1>\
         <p>Password required.</p></main><script>{LOGIN_SCRIPT}</script></body></html>"
    )
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
