use harvest_core::config::UrlTemplate;
use harvest_core::error::{AppError, ParseError};
use harvest_core::models::RecordFields;
use harvest_core::traits::RecordParser;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Label text on the detail page → record field.
const LABELLED_FIELDS: &[(&str, &str)] = &[
    ("Autor:", "author"),
    ("Editorial:", "publisher"),
    ("Materia:", "subject"),
    ("Público objetivo:", "target_audience"),
    ("Publicado:", "publication_date"),
    ("Número de edición:", "edition_number"),
    ("Número de páginas:", "page_count"),
    ("Tamaño:", "size"),
    ("Precio:", "price"),
    ("Encuadernación:", "binding"),
    ("Soporte:", "format"),
    ("Idioma:", "language"),
];

/// Every field a parsed record carries, populated or not.
pub const BOOK_FIELDS: &[&str] = &[
    "isbn",
    "title",
    "subtitle",
    "author",
    "publisher",
    "subject",
    "target_audience",
    "publication_date",
    "edition_number",
    "page_count",
    "size",
    "price",
    "binding",
    "format",
    "language",
    "cover_url",
    "has_real_cover",
];

const PLACEHOLDER_COVER: &str = "libro2.png";

/// Parser for ISBN catalogue detail pages.
///
/// Metadata is laid out as `<span class="labels">Label:</span>` followed by
/// a value span (or an `<a class="texto">` for linked values such as the
/// author). Relative cover paths are resolved against `base`.
#[derive(Debug, Clone)]
pub struct CatalogPageParser {
    base: Url,
}

impl CatalogPageParser {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// Resolve relative links against the detail page URL itself.
    pub fn for_template(template: &UrlTemplate) -> Result<Self, AppError> {
        let base = Url::parse(template.as_str()).map_err(|e| {
            AppError::ConfigError(format!("URL template is not a valid URL: {e}"))
        })?;
        Ok(Self::new(base))
    }

    /// Resolved cover URL plus whether it is a real cover rather than the
    /// catalogue placeholder. Both are absent when the page has no image.
    fn cover(&self, doc: &Html) -> Result<(Option<String>, Option<bool>), ParseError> {
        let img_sel = selector(".lista_libros img")?;
        let Some(src) = doc
            .select(&img_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok((None, None));
        };

        let real = !src.contains(PLACEHOLDER_COVER);
        match self.base.join(src) {
            Ok(url) if real => Ok((Some(url.to_string()), Some(true))),
            Ok(_) => Ok((None, Some(false))),
            Err(e) => {
                tracing::debug!(src, error = %e, "Unresolvable cover URL");
                Ok((None, Some(real)))
            }
        }
    }
}

impl RecordParser for CatalogPageParser {
    fn parse(&self, content: &str) -> Result<RecordFields, ParseError> {
        if content.trim().is_empty() {
            return Err(ParseError::MissingContent("empty page".into()));
        }

        let doc = Html::parse_document(content);
        let title_sel = selector("span.TituloNolink")?;
        let isbn_sel = selector("span.isbn")?;
        let label_sel = selector("span.labels")?;
        let subtitle_sel = selector("i")?;

        let title_span = doc.select(&title_sel).next();
        let isbn_span = doc.select(&isbn_sel).next();
        let labels: Vec<ElementRef<'_>> = doc.select(&label_sel).collect();

        if title_span.is_none() && isbn_span.is_none() && labels.is_empty() {
            return Err(ParseError::MissingContent(
                "no book detail markup on page".into(),
            ));
        }

        let mut fields: RecordFields = BOOK_FIELDS
            .iter()
            .map(|name| (name.to_string(), None))
            .collect();

        if let Some(span) = title_span {
            let mut title = joined_text(span);
            if let Some(subtitle) = span.select(&subtitle_sel).next().map(joined_text)
                && !subtitle.is_empty()
            {
                title = collapse_whitespace(&title.replace(&subtitle, ""));
                fields.insert("subtitle".into(), Some(subtitle));
            }
            fields.insert("title".into(), non_empty(title));
        }

        if let Some(span) = isbn_span {
            let isbn = joined_text(span).replace("ISBN", "");
            fields.insert("isbn".into(), non_empty(isbn.trim().to_string()));
        }

        for (label, field) in LABELLED_FIELDS {
            let value = labels
                .iter()
                .find(|l| l.text().collect::<String>().contains(label))
                .and_then(|l| labelled_value(*l));
            fields.insert((*field).to_string(), value.and_then(non_empty));
        }

        let (cover_url, has_real_cover) = self.cover(&doc)?;
        fields.insert("cover_url".into(), cover_url);
        fields.insert(
            "has_real_cover".into(),
            has_real_cover.map(|real| real.to_string()),
        );
        Ok(fields)
    }
}

/// Value following a label: a sibling `<a class="texto">`, else the next
/// sibling `<span>` (preferring a link inside it).
fn labelled_value(label: ElementRef<'_>) -> Option<String> {
    let siblings: Vec<ElementRef<'_>> = label.next_siblings().filter_map(ElementRef::wrap).collect();

    if let Some(link) = siblings.iter().find(|e| e.value().name() == "a")
        && link.value().classes().any(|c| c == "texto")
    {
        return Some(joined_text(*link));
    }

    let span = siblings.iter().find(|e| e.value().name() == "span")?;
    let link_sel = selector("a").ok()?;
    match span.select(&link_sel).next() {
        Some(link) => Some(joined_text(link)),
        None => Some(joined_text(*span)),
    }
}

fn selector(s: &str) -> Result<Selector, ParseError> {
    Selector::parse(s).map_err(|e| ParseError::Malformed(format!("invalid selector {s}: {e:?}")))
}

fn joined_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
