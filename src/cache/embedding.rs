//! Text embeddings for approximate cache lookup

/// Produces fixed-length, L2-normalized vectors for query text
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimensions(&self) -> usize;
}

/// Function words ignored by [`content_terms`]
///
/// Negations stay out of this list: "should I stop" and "should I not stop"
/// must not embed identically.
const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "did", "do",
    "does", "during", "for", "from", "how", "i", "in", "into", "is", "it", "its", "me", "my",
    "of", "on", "or", "please", "so", "that", "the", "their", "there", "this", "to", "was",
    "we", "were", "what", "what's", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// Lowercased content words of `text` in order, punctuation and stopwords removed
///
/// Typographic apostrophes are folded to `'` first.
pub fn content_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .map(|c| match c {
                    '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
                    other => other,
                })
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .map(|token| token.trim_matches('\'').to_string())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Feature-hashing bag of content words and word pairs
///
/// Deterministic and dependency-free. Punctuation, case and stopwords are
/// ignored, so "What's the capital of France?" and "capital of france"
/// embed identically, while rephrasings score by content overlap.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = content_terms(text);

        let mut vector = vec![0.0f32; self.dimensions];
        let mut add = |feature: &str| {
            let hash = fnv1a(feature.as_bytes());
            let index = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        };

        for token in &tokens {
            add(token);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]));
        }

        normalize(&mut vector);
        vector
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity of two L2-normalized vectors (their dot product)
///
/// Vectors of different lengths are never similar.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
