//! Culture negotiation and message catalogs.
//!
//! Providers, first match wins:
//! 1. `culture` query parameter
//! 2. `.AspNetCore.Culture` cookie (`c=<culture>|uic=<ui culture>`)
//! 3. `Accept-Language`, by descending q-value
//!
//! A requested culture matches a supported one exactly (case-insensitive) or
//! by primary language (`es-MX` -> `es`, `en` -> `en-US`). Nothing matching
//! falls back to the default culture.

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT_LANGUAGE, COOKIE};

use content_infra::config::LocalizationConfig;

use crate::context::RequestCulture;

pub const CULTURE_COOKIE: &str = ".AspNetCore.Culture";
pub const CULTURE_QUERY: &str = "culture";

#[derive(Debug, Clone)]
pub struct Localizer {
    default_culture: String,
    supported: Vec<String>,
}

impl Localizer {
    pub fn new(default_culture: impl Into<String>, supported: Vec<String>) -> Self {
        let default_culture = default_culture.into();
        let mut supported = supported;
        if !supported.iter().any(|c| c.eq_ignore_ascii_case(&default_culture)) {
            supported.insert(0, default_culture.clone());
        }
        Self {
            default_culture,
            supported,
        }
    }

    pub fn from_config(config: &LocalizationConfig) -> Self {
        Self::new(config.default_culture.clone(), config.supported_cultures.clone())
    }

    pub fn default_culture(&self) -> &str {
        &self.default_culture
    }

    /// Pick the request culture from the query string and headers.
    pub fn negotiate(&self, query: Option<&str>, headers: &HeaderMap) -> RequestCulture {
        let from_query = query.and_then(query_culture);
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(cookie_culture);

        let chosen = from_query
            .and_then(|c| self.resolve(&c))
            .or_else(|| from_cookie.and_then(|c| self.resolve(&c)))
            .or_else(|| {
                headers
                    .get(ACCEPT_LANGUAGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|raw| {
                        accept_language(raw)
                            .into_iter()
                            .find_map(|tag| self.resolve(&tag))
                    })
            })
            .unwrap_or(self.default_culture.as_str());

        RequestCulture::new(chosen)
    }

    /// Map a requested culture onto a supported one.
    fn resolve(&self, requested: &str) -> Option<&str> {
        let requested = requested.trim();
        if requested.is_empty() {
            return None;
        }
        if let Some(exact) = self
            .supported
            .iter()
            .find(|c| c.eq_ignore_ascii_case(requested))
        {
            return Some(exact);
        }

        let language = primary_language(requested);
        self.supported
            .iter()
            .find(|c| primary_language(c).eq_ignore_ascii_case(language))
            .map(String::as_str)
    }

    /// Localized text for a message key; falls back to the default culture,
    /// then to the key itself.
    pub fn message(&self, culture: &RequestCulture, key: &str) -> String {
        translate(culture.name(), key)
            .or_else(|| translate(&self.default_culture, key))
            .unwrap_or_else(|| key.to_string())
    }
}

impl Default for Localizer {
    fn default() -> Self {
        Self::from_config(&LocalizationConfig::default())
    }
}

fn primary_language(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

fn query_culture(query: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs
        .into_iter()
        .find(|(key, value)| key == CULTURE_QUERY && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

/// `c=en-US|uic=en-US`, possibly percent-encoded; the UI culture wins.
fn cookie_culture(header: &str) -> Option<String> {
    let raw = header.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        (name == CULTURE_COOKIE).then_some(value)
    })?;
    let decoded = urlencoding::decode(raw.trim_matches('"')).ok()?;

    let mut culture = None;
    let mut ui_culture = None;
    for part in decoded.split('|') {
        match part.split_once('=') {
            Some(("c", value)) if !value.is_empty() => culture = Some(value.to_string()),
            Some(("uic", value)) if !value.is_empty() => ui_culture = Some(value.to_string()),
            _ => {}
        }
    }
    ui_culture.or(culture)
}

/// Language tags ordered by q-value (stable for ties); `q=0` and `*` dropped.
fn accept_language(raw: &str) -> Vec<String> {
    let mut tags: Vec<(String, f32)> = raw
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = parts
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then(|| (tag.to_string(), quality))
        })
        .collect();

    tags.sort_by(|a, b| b.1.total_cmp(&a.1));
    tags.into_iter().map(|(tag, _)| tag).collect()
}

fn translate(culture: &str, key: &str) -> Option<String> {
    let language = primary_language(culture).to_ascii_lowercase();
    let catalog: fn(&str) -> Option<&'static str> = match language.as_str() {
        "fa" => fa,
        "en" => en,
        "es" => es,
        _ => return None,
    };

    if let Some(text) = catalog(key) {
        return Some(text.to_string());
    }

    // `{field}.required` style keys share one template per rule.
    let (field, rule) = key.rsplit_once('.')?;
    let template = catalog(&format!("rule.{rule}"))?;
    let label = catalog(&format!("field.{field}")).unwrap_or(field);
    Some(template.replace("{field}", label))
}

fn en(key: &str) -> Option<&'static str> {
    Some(match key {
        "category.not_found" => "Category not found.",
        "category.parent_not_found" => "Parent category not found.",
        "category.self_parent" => "A category cannot be its own parent.",
        "category.has_children" => "The category has subcategories and cannot be deleted.",
        "post.not_found" => "Post not found.",
        "comment.not_found" => "Comment not found.",
        "concurrency.conflict" => "The item was changed by another request. Reload and try again.",
        "error.validation" => "One or more validation errors occurred.",
        "error.invalid_id" => "The identifier is not valid.",
        "error.invalid_body" => "The request body is not valid.",
        "error.invalid_query" => "The query string is not valid.",
        "error.internal" => "An unexpected error occurred.",
        "rule.required" => "{field} is required.",
        "rule.too_long" => "{field} is too long.",
        "rule.invalid" => "{field} is not valid.",
        "rule.already_exists" => "{field} already exists.",
        "field.title" => "Title",
        "field.description" => "Description",
        "field.summary" => "Summary",
        "field.body" => "Body",
        "field.author" => "Author",
        "field.author_name" => "Author name",
        "field.text" => "Text",
        "field.page" => "Page",
        "field.page_size" => "Page size",
        "field.category" => "Category",
        "field.post" => "Post",
        "field.comment" => "Comment",
        _ => return None,
    })
}

fn fa(key: &str) -> Option<&'static str> {
    Some(match key {
        "category.not_found" => "دسته‌بندی یافت نشد.",
        "category.parent_not_found" => "دسته‌بندی والد یافت نشد.",
        "category.self_parent" => "یک دسته‌بندی نمی‌تواند والد خودش باشد.",
        "category.has_children" => "این دسته‌بندی زیردسته دارد و قابل حذف نیست.",
        "post.not_found" => "مطلب یافت نشد.",
        "comment.not_found" => "نظر یافت نشد.",
        "concurrency.conflict" => "این مورد توسط درخواست دیگری تغییر کرده است. دوباره تلاش کنید.",
        "error.validation" => "یک یا چند خطای اعتبارسنجی رخ داد.",
        "error.invalid_id" => "شناسه نامعتبر است.",
        "error.invalid_body" => "بدنه درخواست نامعتبر است.",
        "error.invalid_query" => "پارامترهای درخواست نامعتبر است.",
        "error.internal" => "خطای غیرمنتظره‌ای رخ داد.",
        "rule.required" => "{field} الزامی است.",
        "rule.too_long" => "{field} بیش از حد طولانی است.",
        "rule.invalid" => "{field} نامعتبر است.",
        "rule.already_exists" => "{field} از قبل وجود دارد.",
        "field.title" => "عنوان",
        "field.description" => "توضیحات",
        "field.summary" => "خلاصه",
        "field.body" => "متن",
        "field.author" => "نویسنده",
        "field.author_name" => "نام نویسنده",
        "field.text" => "متن نظر",
        "field.page" => "شماره صفحه",
        "field.page_size" => "اندازه صفحه",
        "field.category" => "دسته‌بندی",
        "field.post" => "مطلب",
        "field.comment" => "نظر",
        _ => return None,
    })
}

fn es(key: &str) -> Option<&'static str> {
    Some(match key {
        "category.not_found" => "Categoría no encontrada.",
        "category.parent_not_found" => "Categoría padre no encontrada.",
        "category.self_parent" => "Una categoría no puede ser su propia categoría padre.",
        "category.has_children" => "La categoría tiene subcategorías y no se puede eliminar.",
        "post.not_found" => "Publicación no encontrada.",
        "comment.not_found" => "Comentario no encontrado.",
        "concurrency.conflict" => "Otra solicitud modificó el elemento. Vuelva a cargarlo e inténtelo de nuevo.",
        "error.validation" => "Se produjeron uno o más errores de validación.",
        "error.invalid_id" => "El identificador no es válido.",
        "error.invalid_body" => "El cuerpo de la solicitud no es válido.",
        "error.invalid_query" => "La cadena de consulta no es válida.",
        "error.internal" => "Se produjo un error inesperado.",
        "rule.required" => "{field} es obligatorio.",
        "rule.too_long" => "{field} es demasiado largo.",
        "rule.invalid" => "{field} no es válido.",
        "rule.already_exists" => "{field} ya existe.",
        "field.title" => "El título",
        "field.description" => "La descripción",
        "field.summary" => "El resumen",
        "field.body" => "El contenido",
        "field.author" => "El autor",
        "field.author_name" => "El nombre del autor",
        "field.text" => "El texto",
        "field.page" => "La página",
        "field.page_size" => "El tamaño de página",
        "field.category" => "La categoría",
        "field.post" => "La publicación",
        "field.comment" => "El comentario",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(axum::http::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn falls_back_to_persian() {
        let localizer = Localizer::default();

        let culture = localizer.negotiate(None, &HeaderMap::new());

        assert_eq!(culture.name(), "fa-IR");
    }

    #[test]
    fn query_beats_cookie_beats_accept_language() {
        let localizer = Localizer::default();
        let all = headers(&[
            (COOKIE, ".AspNetCore.Culture=c%3Des%7Cuic%3Des"),
            (ACCEPT_LANGUAGE, "en-US"),
        ]);

        assert_eq!(localizer.negotiate(Some("culture=en-US"), &all).name(), "en-US");
        assert_eq!(localizer.negotiate(Some("page=2"), &all).name(), "es");
        assert_eq!(
            localizer
                .negotiate(None, &headers(&[(ACCEPT_LANGUAGE, "en-US")]))
                .name(),
            "en-US"
        );
    }

    #[test]
    fn accept_language_honours_q_values_and_language_prefixes() {
        let localizer = Localizer::default();
        let accept = headers(&[(ACCEPT_LANGUAGE, "de-DE, en;q=0.5, es-MX;q=0.8")]);

        assert_eq!(localizer.negotiate(None, &accept).name(), "es");
    }

    #[test]
    fn unsupported_cultures_fall_back() {
        let localizer = Localizer::default();
        let accept = headers(&[(ACCEPT_LANGUAGE, "de-DE, fr;q=0.9, en;q=0")]);

        assert_eq!(localizer.negotiate(Some("culture=ja-JP"), &accept).name(), "fa-IR");
    }

    #[test]
    fn cookie_prefers_the_ui_culture() {
        assert_eq!(cookie_culture("theme=dark; .AspNetCore.Culture=c=es|uic=en-US").as_deref(), Some("en-US"));
        assert_eq!(cookie_culture(".AspNetCore.Culture=c=es").as_deref(), Some("es"));
        assert_eq!(cookie_culture("theme=dark"), None);
    }

    #[test]
    fn cookie_values_are_fully_percent_decoded() {
        assert_eq!(cookie_culture(".AspNetCore.Culture=c%3des%7cuic%3Den%2DUS").as_deref(), Some("en-US"));
        assert_eq!(cookie_culture(".AspNetCore.Culture=\"c%3Des\"").as_deref(), Some("es"));
        assert_eq!(cookie_culture(".AspNetCore.Culture=%E0%A4"), None);
    }

    #[test]
    fn query_culture_is_percent_decoded() {
        assert_eq!(query_culture("page=2&culture=en%2DUS").as_deref(), Some("en-US"));
        assert_eq!(query_culture("culture=+es+").as_deref(), Some("es"));
        assert_eq!(query_culture("culture=&page=1"), None);

        let localizer = Localizer::default();
        assert_eq!(localizer.negotiate(Some("culture=en%2Dus"), &HeaderMap::new()).name(), "en-US");
    }

    #[test]
    fn field_rules_are_templated_per_culture() {
        let localizer = Localizer::default();

        assert_eq!(
            localizer.message(&RequestCulture::new("en-US"), "title.required"),
            "Title is required."
        );
        assert_eq!(
            localizer.message(&RequestCulture::new("es"), "summary.too_long"),
            "El resumen es demasiado largo."
        );
        assert_eq!(
            localizer.message(&RequestCulture::new("fa-IR"), "post.not_found"),
            "مطلب یافت نشد."
        );
    }

    #[test]
    fn unknown_keys_are_returned_verbatim() {
        let localizer = Localizer::default();

        assert_eq!(
            localizer.message(&RequestCulture::new("en-US"), "post.id_mismatch"),
            "post.id_mismatch"
        );
    }
}
