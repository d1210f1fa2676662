//! Server-side HTML catalog template (§4.7).

use crate::model::{BookDescriptor, FormatTag};

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn book_row(book: &BookDescriptor, kindle_available: bool) -> String {
    let title = escape(&book.title);
    let authors = escape(&book.authors_display());
    let format = escape(&book.format);
    let size = human_size(book.file_size);

    let needs_kindle_button = kindle_available
        && !FormatTag::from_extension(&book.format)
            .is_some_and(|format| format.kindle_native());

    let kindle_button = if needs_kindle_button {
        format!(
            "<a class=\"button\" href=\"/api/books/{id}/kindle\">Kindle</a>",
            id = book.id
        )
    } else {
        String::new()
    };

    format!(
        "<tr>\
           <td class=\"title\">{title}</td>\
           <td class=\"authors\">{authors}</td>\
           <td class=\"format\">{format}</td>\
           <td class=\"size\">{size}</td>\
           <td class=\"actions\">\
             <a class=\"button\" href=\"/api/books/{id}/download\">Download</a>{kindle_button}\
           </td>\
         </tr>",
        id = book.id
    )
}

/// Render the full catalog page.
pub fn render_catalog(title: &str, books: &[BookDescriptor], kindle_available: bool) -> String {
    let title = escape(title);
    let body = if books.is_empty() {
        "<p class=\"empty-state\">No books yet. Add some files to your library.</p>".to_string()
    } else {
        let rows: String = books.iter().map(|b| book_row(b, kindle_available)).collect();
        format!(
            "<table>\
               <thead><tr><th>Title</th><th>Authors</th><th>Format</th><th>Size</th><th></th></tr></thead>\
               <tbody>{rows}</tbody>\
             </table>"
        )
    };

    format!(
        "<!DOCTYPE html>\
<html lang=\"en\">\
<head>\
<meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{title}</title>\
<style>\
body{{font-family:system-ui,sans-serif;margin:0;padding:1rem;background:#fafafa;color:#222}}\
h1{{font-size:1.4rem}}\
table{{width:100%;border-collapse:collapse}}\
th,td{{padding:.5rem;text-align:left;border-bottom:1px solid #ddd}}\
.button{{display:inline-block;margin-right:.5rem;padding:.25rem .6rem;border:1px solid #888;border-radius:.25rem;text-decoration:none;color:#222}}\
.empty-state{{color:#666}}\
@media (max-width:600px){{table,thead,tbody,tr,th,td{{display:block}}th{{display:none}}td{{border:none;padding:.2rem 0}}tr{{padding-bottom:.75rem;border-bottom:1px solid #ddd}}}}\
</style>\
</head>\
<body>\
<h1>{title}</h1>\
{body}\
</body>\
</html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_book(authors: Vec<&str>) -> BookDescriptor {
        BookDescriptor {
            id: "b1".to_string(),
            title: "<Script>".to_string(),
            authors: authors.into_iter().map(String::from).collect(),
            format: "epub".to_string(),
            file_size: 2048,
            date_added: Utc::now(),
        }
    }

    #[test]
    fn title_and_authors_are_html_escaped() {
        let html = render_catalog("My Library", &[sample_book(vec!["A & B"])], true);
        assert!(html.contains("&lt;Script&gt;"));
        assert!(html.contains("A &amp; B"));
        assert!(!html.contains("<Script>"));
    }

    #[test]
    fn empty_catalog_renders_empty_state() {
        let html = render_catalog("My Library", &[], true);
        assert!(html.contains("empty-state"));
    }

    #[test]
    fn kindle_button_hidden_when_converter_unavailable() {
        let html = render_catalog("My Library", &[sample_book(vec!["Author"])], false);
        assert!(!html.contains("/kindle"));
        assert!(html.contains("/download"));
    }

    #[test]
    fn missing_authors_falls_back_to_unknown_author() {
        let html = render_catalog("My Library", &[sample_book(vec![])], true);
        assert!(html.contains("Unknown Author"));
    }

    #[test]
    fn kindle_button_hidden_for_native_kindle_formats() {
        let mut book = sample_book(vec!["Author"]);
        book.format = "mobi".to_string();
        let html = render_catalog("My Library", &[book], true);
        assert!(!html.contains("/kindle"));
        assert!(html.contains("/download"));
    }
}
