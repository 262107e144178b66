use std::collections::BTreeMap;

use core_types::UiLanguage;

#[derive(Debug, Clone)]
pub struct I18n {
    lang: UiLanguage,
    es: BTreeMap<&'static str, &'static str>,
    en: BTreeMap<&'static str, &'static str>,
}

impl I18n {
    pub fn new(lang: UiLanguage) -> Self {
        Self {
            lang,
            es: es_map(),
            en: en_map(),
        }
    }

    pub fn set_language(&mut self, lang: UiLanguage) {
        self.lang = lang;
    }

    pub fn language(&self) -> UiLanguage {
        self.lang
    }

    pub fn t<'a>(&'a self, key: &'a str) -> &'a str {
        let (primary, fallback) = match self.lang {
            UiLanguage::Es => (&self.es, &self.en),
            UiLanguage::En => (&self.en, &self.es),
        };
        primary
            .get(key)
            .or_else(|| fallback.get(key))
            .copied()
            .unwrap_or(key)
    }
}

fn es_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "Mis Notas"),
        ("notes.empty", "No hay notas aún."),
        ("notes.saved", "Nota guardada"),
        ("notes.updated", "Cambios guardados"),
        ("notes.deleted", "Nota eliminada"),
        ("notes.cleared", "Se eliminaron todas las notas"),
        ("notes.not_found", "No se encontró la nota"),
        ("notes.imported", "Notas importadas"),
        ("notes.exported", "Notas exportadas"),
        ("error.write", "No se pudieron guardar las notas"),
        ("error.import.parse", "Los datos importados no son JSON válido"),
        (
            "error.import.not_array",
            "Los datos importados no son un array válido",
        ),
        (
            "error.import.bad_shape",
            "Los datos importados no tienen el formato correcto",
        ),
        ("validation.title", "El título no puede estar vacío"),
        ("validation.content", "El contenido no puede estar vacío"),
        ("validation.category", "Categoría desconocida"),
        ("stats.title", "Estadísticas"),
        ("stats.total", "Total de Notas"),
        ("stats.by_category", "Notas por Categoría"),
        ("stats.longest", "Nota más Larga"),
        ("stats.shortest", "Nota más Corta"),
        ("stats.chars", "caracteres"),
        ("ai.improved", "Texto mejorado"),
        ("ai.disabled", "La mejora de texto con IA está desactivada"),
        ("ai.failed", "No se pudo mejorar el texto"),
        (
            "ai.missing_key",
            "Falta la clave de API; configura `ai.api_key` en el archivo de configuración",
        ),
        (
            "ai.auth",
            "Error de autenticación con el servicio de IA; revisa la clave de API",
        ),
        (
            "ai.rate_limited",
            "Se superó la cuota o el límite de solicitudes del servicio de IA",
        ),
        (
            "ai.server",
            "El servicio de IA no está disponible; inténtalo más tarde",
        ),
        ("ai.empty", "El servicio de IA no devolvió texto"),
    ])
}

fn en_map() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("app.title", "My Notes"),
        ("notes.empty", "No notes yet."),
        ("notes.saved", "Note saved"),
        ("notes.updated", "Changes saved"),
        ("notes.deleted", "Note deleted"),
        ("notes.cleared", "All notes were removed"),
        ("notes.not_found", "Note not found"),
        ("notes.imported", "Notes imported"),
        ("notes.exported", "Notes exported"),
        ("error.write", "Notes could not be saved"),
        ("error.import.parse", "Imported data is not valid JSON"),
        ("error.import.not_array", "Imported data is not a valid array"),
        (
            "error.import.bad_shape",
            "Imported data does not have the expected format",
        ),
        ("validation.title", "Title cannot be empty"),
        ("validation.content", "Content cannot be empty"),
        ("validation.category", "Unknown category"),
        ("stats.title", "Statistics"),
        ("stats.total", "Total notes"),
        ("stats.by_category", "Notes by category"),
        ("stats.longest", "Longest note"),
        ("stats.shortest", "Shortest note"),
        ("stats.chars", "characters"),
        ("ai.improved", "Improved text"),
        ("ai.disabled", "AI text improvement is disabled"),
        ("ai.failed", "The text could not be improved"),
        (
            "ai.missing_key",
            "Missing API key; set `ai.api_key` in the config file",
        ),
        (
            "ai.auth",
            "Authentication with the AI service failed; check the API key",
        ),
        ("ai.rate_limited", "AI service quota or rate limit exceeded"),
        (
            "ai.server",
            "The AI service is unavailable; try again later",
        ),
        ("ai.empty", "The AI service returned no text"),
    ])
}
