//! Article text analysis.
//!
//! [`ProcessingFunction`] is the seam the worker loop calls; [`TextProcessor`]
//! is the bundled lexicon-based implementation for Spanish-language economic
//! news.

use article_queue_core::{ArticleMetrics, ArticlePayload};
use regex::Regex;
use scraper::{Html, Node};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

/// Pure transform from raw article text to metrics.
///
/// Must not panic on malformed input. A result with `error` set counts as a
/// failed attempt.
pub trait ProcessingFunction: Send + Sync {
    fn process(&self, article: &ArticlePayload) -> ArticleMetrics;
}

/// Longest cleaned text kept in the result
pub const MAX_CLEANED_CHARS: usize = 2000;
pub const MAX_ENTITIES: usize = 20;
pub const MIN_TOKEN_CHARS: usize = 3;

const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "aside", "iframe"];

const ECONOMIC_KEYWORDS: &[&str] = &[
    // markets
    "colcap", "bolsa", "acciones", "bursátil", "mercado", "índice", "inversión",
    "inversionistas", "cotización", "valorización",
    // economy
    "economía", "económico", "pib", "crecimiento", "desarrollo", "producción",
    "productividad", "competitividad",
    // finance
    "banco", "bancos", "bancario", "financiero", "crédito", "préstamo", "tasa", "tasas",
    "interés", "financiamiento",
    // trade
    "comercio", "exportación", "exportaciones", "importación", "importaciones", "balanza",
    "déficit", "superávit", "aranceles",
    // currency
    "dólar", "dólares", "peso", "pesos", "divisa", "divisas", "devaluación", "revaluación",
    "cambio",
    // prices
    "inflación", "deflación", "precios", "ipc", "costo", "costos", "encarecimiento",
    "abaratamiento",
    // labour
    "empleo", "desempleo", "trabajo", "empleos", "desocupación", "ocupación", "laboral",
    "salario", "salarios",
    // sectors
    "petróleo", "petrolero", "energía", "minería", "agricultura", "industria", "servicios",
    "construcción", "turismo",
    // fiscal policy
    "impuesto", "impuestos", "tributario", "fiscal", "presupuesto", "gasto", "reforma",
    // cycles
    "crisis", "recesión", "recuperación", "reactivación", "estabilidad", "volatilidad",
    "riesgo", "incertidumbre",
];

const STOPWORDS: &[&str] = &[
    "el", "la", "de", "que", "y", "a", "en", "un", "ser", "se", "no", "haber", "por", "con",
    "su", "para", "como", "estar", "tener", "le", "lo", "todo", "pero", "más", "hacer", "o",
    "poder", "decir", "este", "ir", "otro", "ese", "si", "me", "ya", "ver", "porque", "dar",
    "cuando", "él", "muy", "sin", "vez", "mucho", "saber", "qué", "sobre", "mi", "alguno",
    "mismo", "yo", "también", "hasta", "año", "dos", "querer", "entre", "así", "primero",
    "desde", "grande", "eso", "ni", "nos", "llegar", "pasar", "tiempo", "ella", "sí", "día",
    "uno", "bien", "poco", "deber", "entonces", "poner", "cosa", "tanto", "hombre", "parecer",
    "nuestro", "tan", "donde", "ahora", "parte", "después", "vida", "quedar", "siempre",
    "creer", "hablar", "llevar", "dejar", "nada", "cada", "seguir", "menos", "nuevo",
    "encontrar", "algo", "solo", "puede", "fue", "han", "son", "sus", "les", "una", "las",
    "del", "los", "al", "está", "ha", "hay", "fueron", "era", "sean",
];

const POSITIVE_WORDS: &[&str] = &[
    "crecimiento", "recuperación", "éxito", "ganancia", "beneficio", "aumento", "mejora",
    "optimismo", "positivo", "favorable", "ventaja", "fortaleza", "prosperidad", "avance",
    "progreso", "subida", "alza", "expansión", "superávit", "rentabilidad", "eficiencia",
    "competitivo", "innovación",
];

const NEGATIVE_WORDS: &[&str] = &[
    "crisis", "caída", "pérdida", "déficit", "recesión", "desplome", "baja", "declive",
    "retroceso", "negativo", "desfavorable", "riesgo", "incertidumbre", "volatilidad",
    "desempleo", "inflación", "devaluación", "colapso", "quiebra", "bancarrota", "deterioro",
    "debilidad", "contracción", "reducción",
];

/// Words that, right before a capitalised word, mark it as an organisation
const ORG_INDICATORS: &[&str] = &["banco", "empresa", "compañía", "corporación", "grupo", "ministerio"];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static URLS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"http\S+|www\S+").unwrap());
static EMAILS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+@\S+").unwrap());
static NON_LETTERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-záéíóúüñ\s]").unwrap());

/// Lexicon-based analyser for Spanish economic news
pub struct TextProcessor {
    economic_keywords: HashSet<&'static str>,
    stopwords: HashSet<&'static str>,
    positive_words: HashSet<&'static str>,
    negative_words: HashSet<&'static str>,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextProcessor {
    pub fn new() -> Self {
        Self {
            economic_keywords: ECONOMIC_KEYWORDS.iter().copied().collect(),
            stopwords: STOPWORDS.iter().copied().collect(),
            positive_words: POSITIVE_WORDS.iter().copied().collect(),
            negative_words: NEGATIVE_WORDS.iter().copied().collect(),
        }
    }

    /// Visible text of an HTML fragment, whitespace collapsed
    pub fn clean_html(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let mut parts: Vec<&str> = Vec::new();

        for node in document.tree.root().descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                matches!(ancestor.value(), Node::Element(el) if SKIPPED_TAGS.contains(&el.name()))
            });
            let text = text.trim();
            if !hidden && !text.is_empty() {
                parts.push(text);
            }
        }

        WHITESPACE.replace_all(&parts.join(" "), " ").trim().to_string()
    }

    /// Lower-case, strip URLs and e-mail addresses, keep only letters
    pub fn normalize(&self, text: &str) -> String {
        let text = text.to_lowercase();
        let text = URLS.replace_all(&text, "");
        let text = EMAILS.replace_all(&text, "");
        let text = NON_LETTERS.replace_all(&text, " ");
        WHITESPACE.replace_all(&text, " ").trim().to_string()
    }

    pub fn tokenize<'a>(&self, normalized: &'a str) -> Vec<&'a str> {
        normalized
            .split_whitespace()
            .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
            .filter(|token| !self.stopwords.contains(*token))
            .collect()
    }

    pub fn keyword_counts(&self, tokens: &[&str]) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for token in tokens.iter().filter(|t| self.economic_keywords.contains(**t)) {
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// (positive - negative) / (positive + negative), rounded to 3 decimals;
    /// 0 when no lexicon word appears
    pub fn sentiment(&self, tokens: &[&str]) -> f64 {
        let positive = tokens.iter().filter(|t| self.positive_words.contains(**t)).count();
        let negative = tokens.iter().filter(|t| self.negative_words.contains(**t)).count();
        let total = positive + negative;
        if total == 0 {
            return 0.0;
        }

        let score = (positive as f64 - negative as f64) / total as f64;
        (score * 1000.0).round() / 1000.0
    }

    /// Capitalised words preceded by an organisation indicator, and pairs of
    /// consecutive capitalised words. The first word of the text is never a
    /// candidate.
    pub fn entities(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut seen = HashSet::new();
        let mut entities = Vec::new();

        for i in 1..words.len() {
            if !starts_uppercase(words[i]) {
                continue;
            }

            let previous = words[i - 1].to_lowercase();
            let candidate = if ORG_INDICATORS.iter().any(|ind| previous.contains(ind)) {
                Some(words[i].to_string())
            } else if i + 1 < words.len() && starts_uppercase(words[i + 1]) {
                Some(format!("{} {}", words[i], words[i + 1]))
            } else {
                None
            };

            if let Some(entity) = candidate {
                if seen.insert(entity.clone()) {
                    entities.push(entity);
                    if entities.len() == MAX_ENTITIES {
                        break;
                    }
                }
            }
        }

        entities
    }
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

impl ProcessingFunction for TextProcessor {
    fn process(&self, article: &ArticlePayload) -> ArticleMetrics {
        let cleaned = self.clean_html(&article.content);
        if cleaned.is_empty() && article.title.trim().is_empty() {
            return ArticleMetrics::failed("article has no text");
        }

        let full_text = format!("{}. {}", article.title, cleaned);
        let normalized = self.normalize(&full_text);
        let tokens = self.tokenize(&normalized);

        ArticleMetrics {
            cleaned_content: cleaned.chars().take(MAX_CLEANED_CHARS).collect(),
            word_count: tokens.len(),
            keyword_counts: self.keyword_counts(&tokens),
            sentiment_score: self.sentiment(&tokens),
            entities: self.entities(&cleaned),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
          <head><style>p { color: red; }</style></head>
          <body>
            <nav>Inicio | Economía</nav>
            <h1>Análisis del COLCAP en 2024</h1>
            <p>El índice <strong>COLCAP</strong> ha mostrado un crecimiento sostenido.
            Los inversionistas mantienen optimismo sobre el mercado bursátil.</p>
            <p>Expertos del Banco República señalan que la inflación se ha estabilizado.</p>
            <script>track("x")</script>
          </body>
        </html>"#;

    #[test]
    fn test_clean_html_drops_hidden_elements() {
        let processor = TextProcessor::new();
        let cleaned = processor.clean_html(SAMPLE);

        assert!(cleaned.contains("Análisis del COLCAP en 2024"));
        assert!(cleaned.contains("COLCAP ha mostrado"));
        assert!(!cleaned.contains("track"));
        assert!(!cleaned.contains("color"));
        assert!(!cleaned.contains("Inicio"));
        assert!(!cleaned.contains("  "));
    }

    #[test]
    fn test_clean_html_tolerates_broken_markup() {
        let processor = TextProcessor::new();
        let cleaned = processor.clean_html("<div><p>hola <b>mundo</div></i>");
        assert_eq!(cleaned, "hola mundo");
    }

    #[test]
    fn test_normalize_strips_urls_and_symbols() {
        let processor = TextProcessor::new();
        let normalized = processor.normalize("¡Subió 5%! Ver https://x.co o escribir a a@b.co ÑANDÚ");
        assert_eq!(normalized, "subió ver o escribir a ñandú");
    }

    #[test]
    fn test_tokenize_filters_short_words_and_stopwords() {
        let processor = TextProcessor::new();
        let tokens = processor.tokenize("el mercado de las acciones sube");
        assert_eq!(tokens, vec!["mercado", "acciones", "sube"]);
    }

    #[test]
    fn test_sentiment_bounds_and_rounding() {
        let processor = TextProcessor::new();

        assert_eq!(processor.sentiment(&["crecimiento", "alza"]), 1.0);
        assert_eq!(processor.sentiment(&["crisis"]), -1.0);
        assert_eq!(processor.sentiment(&["mercado"]), 0.0);
        assert_eq!(processor.sentiment(&["crecimiento", "crisis", "riesgo"]), -0.333);
    }

    #[test]
    fn test_entities() {
        let processor = TextProcessor::new();
        let entities = processor.entities("Hoy el banco Davivienda y Grupo Aval Acciones subieron con Ecopetrol");

        assert!(entities.contains(&"Davivienda".to_string()));
        assert!(entities.contains(&"Grupo Aval".to_string()));
        assert!(!entities.iter().any(|e| e.starts_with("Hoy")));
    }

    #[test]
    fn test_process_article() {
        let processor = TextProcessor::new();
        let article = ArticlePayload::new("Análisis del COLCAP", SAMPLE, "http://example.com");
        let metrics = processor.process(&article);

        assert!(!metrics.is_failure());
        assert!(metrics.word_count > 0);
        assert_eq!(metrics.keyword_counts.get("colcap"), Some(&3));
        assert!(metrics.keyword_counts.contains_key("inflación"));
        assert!((-1.0..=1.0).contains(&metrics.sentiment_score));
        assert!(metrics.entities.contains(&"República".to_string()));
    }

    #[test]
    fn test_empty_article_is_a_failure() {
        let processor = TextProcessor::new();
        let metrics = processor.process(&ArticlePayload::new("  ", "<script>x()</script>", ""));

        assert!(metrics.is_failure());
        assert_eq!(metrics.word_count, 0);
    }

    #[test]
    fn test_cleaned_content_is_truncated() {
        let processor = TextProcessor::new();
        let body = format!("<p>{}</p>", "ñandú ".repeat(1000));
        let metrics = processor.process(&ArticlePayload::new("t", body, ""));

        assert_eq!(metrics.cleaned_content.chars().count(), MAX_CLEANED_CHARS);
    }
}
