//! Random catalog content for the bulk generator.

use chrono::Utc;
use rand::{seq::SliceRandom, Rng};
use sea_orm::Set;

use crate::entities::product;

pub const MIN_PRICE: f64 = 1000.0;
pub const MAX_PRICE: f64 = 50_000.0;

const ADJECTIVES: &[&str] = &[
    "Adaptive", "Balanced", "Centralized", "Compatible", "Configurable", "Cross-platform",
    "Customizable", "Decentralized", "Digitized", "Distributed", "Ergonomic", "Exclusive",
    "Expanded", "Extended", "Focused", "Front-line", "Fully-configurable", "Horizontal",
    "Innovative", "Integrated", "Intuitive", "Managed", "Multi-layered", "Networked",
    "Optimized", "Organic", "Persistent", "Proactive", "Progressive", "Reactive", "Robust",
    "Seamless", "Secured", "Streamlined", "Synergized", "Universal", "User-friendly",
    "Versatile", "Virtual", "Visionary",
];

const DESCRIPTORS: &[&str] = &[
    "24/7", "asymmetric", "bottom-line", "client-driven", "content-based", "dedicated",
    "demand-driven", "dynamic", "encompassing", "executive", "explicit", "global",
    "heuristic", "high-level", "holistic", "homogeneous", "hybrid", "incremental",
    "interactive", "local", "logistical", "mission-critical", "modular", "motivating",
    "multimedia", "national", "neutral", "optimizing", "real-time", "regional", "scalable",
    "static", "systematic", "tangible", "transitional", "uniform", "zero-defect",
];

const NOUNS: &[&str] = &[
    "ability", "access", "adapter", "algorithm", "alliance", "analyzer", "application",
    "architecture", "array", "attitude", "benchmark", "capability", "circuit", "complexity",
    "concept", "core", "database", "definition", "emulation", "encoding", "firmware",
    "flexibility", "framework", "functionality", "hardware", "hierarchy", "implementation",
    "infrastructure", "initiative", "interface", "matrix", "methodology", "middleware",
    "model", "moratorium", "paradigm", "policy", "portal", "productivity", "project",
    "protocol", "service-desk", "software", "solution", "standardization", "strategy",
    "structure", "synergy", "system", "throughput", "toolset", "website", "workforce",
];

const WORDS: &[&str] = &[
    "about", "across", "action", "agent", "almost", "answer", "appear", "around", "become",
    "behind", "between", "board", "bring", "build", "career", "carry", "central", "change",
    "choice", "close", "common", "country", "course", "create", "culture", "daughter",
    "decide", "design", "detail", "develop", "early", "economy", "effort", "enough",
    "evening", "example", "family", "field", "figure", "final", "financial", "follow",
    "garden", "general", "ground", "growth", "happen", "history", "house", "image",
    "indeed", "industry", "inside", "interest", "kitchen", "language", "large", "leader",
    "letter", "listen", "market", "material", "measure", "method", "minute", "modern",
    "morning", "nature", "network", "number", "office", "option", "order", "outside",
    "paper", "people", "period", "picture", "place", "player", "policy", "popular",
    "power", "practice", "prepare", "pressure", "price", "process", "produce", "program",
    "purpose", "quality", "question", "reason", "record", "region", "report", "research",
    "result", "return", "science", "season", "second", "series", "service", "simple",
    "single", "social", "source", "special", "stage", "standard", "station", "story",
    "strategy", "street", "strong", "student", "subject", "summer", "system", "table",
    "texture", "theory", "thought", "through", "today", "travel", "value", "version",
    "village", "window", "winter", "within", "without", "worker", "writer", "yourself",
];

/// A single lowercase word, used for fabricated category names.
pub fn word<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, WORDS).to_string()
}

/// Three-part marketing phrase such as "Robust modular framework".
pub fn catch_phrase<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{} {} {}",
        pick(rng, ADJECTIVES),
        pick(rng, DESCRIPTORS),
        pick(rng, NOUNS)
    )
}

/// A few sentences of filler text.
pub fn paragraph<R: Rng + ?Sized>(rng: &mut R) -> String {
    let sentences = rng.gen_range(2..=5);
    (0..sentences)
        .map(|_| sentence(rng))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uniform in [MIN_PRICE, MAX_PRICE], rounded to cents.
pub fn price<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let raw: f64 = rng.gen_range(MIN_PRICE..=MAX_PRICE);
    ((raw * 100.0).round() / 100.0).clamp(MIN_PRICE, MAX_PRICE)
}

pub fn category_names<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<String> {
    (0..count).map(|_| word(rng)).collect()
}

/// Unsaved products spread randomly over `category_ids`. Empty when there is no category.
pub fn products<R: Rng + ?Sized>(
    rng: &mut R,
    category_ids: &[i32],
    uploaded_by: i32,
    count: usize,
) -> Vec<product::ActiveModel> {
    let now = Utc::now();
    let mut products = Vec::with_capacity(count);

    for _ in 0..count {
        let Some(category_id) = category_ids.choose(rng) else {
            break;
        };
        products.push(product::ActiveModel {
            category_id: Set(*category_id),
            title: Set(catch_phrase(rng)),
            description: Set(paragraph(rng)),
            price: Set(price(rng)),
            status: Set(product::DEFAULT_STATUS.to_string()),
            uploaded_by: Set(uploaded_by),
            video: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });
    }

    products
}

fn sentence<R: Rng + ?Sized>(rng: &mut R) -> String {
    let length = rng.gen_range(6..=12);
    let words: Vec<&str> = (0..length).map(|_| pick(rng, WORDS)).collect();
    let mut sentence = words.join(" ");
    if let Some(first) = sentence.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    sentence.push('.');
    sentence
}

fn pick<R: Rng + ?Sized>(rng: &mut R, list: &'static [&'static str]) -> &'static str {
    list.choose(rng).copied().unwrap_or("item")
}
