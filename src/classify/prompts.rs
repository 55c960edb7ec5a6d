pub const SYSTEM_PROMPT: &str = r#"You are an expert app analyst specializing in user feedback analysis.
Your task is to classify individual app store reviews.

You must respond with ONLY valid JSON matching this exact schema:
{
    "results": [
        {
            "index": 1,
            "sentiment": "positive|neutral|negative",
            "topics": ["short topic labels, e.g. 'performance', 'login', 'user interface'"],
            "summary": "one sentence describing what the reviewer is saying",
            "feature_request": "short name of a feature the reviewer asks for, or null"
        }
    ]
}

Guidelines:
- Return exactly one result per review, in the same order, with the review's index
- Use 1 to 4 topics per review, lower-case, two or three words at most
- Use "neutral" for mixed or purely factual reviews
- Set "feature_request" only when the reviewer explicitly asks for something new
- Do not add any text outside the JSON object"#;

/// Prompt wording is pluggable; model clients only decide how to send it.
pub trait PromptStrategy: Send + Sync {
    fn system_prompt(&self) -> &str;
    fn render(&self, texts: &[String]) -> String;
}

pub struct DefaultPromptStrategy {
    max_chars_per_review: usize,
}

impl DefaultPromptStrategy {
    pub fn new(max_chars_per_review: usize) -> Self {
        Self {
            max_chars_per_review,
        }
    }
}

impl Default for DefaultPromptStrategy {
    fn default() -> Self {
        Self::new(2_000)
    }
}

impl PromptStrategy for DefaultPromptStrategy {
    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn render(&self, texts: &[String]) -> String {
        let mut prompt = format!("Classify the following {} app store review(s):\n\n", texts.len());

        for (i, text) in texts.iter().enumerate() {
            prompt.push_str(&format!("[{}] ", i + 1));
            if text.chars().count() > self.max_chars_per_review {
                let truncated: String = text.chars().take(self.max_chars_per_review).collect();
                prompt.push_str(&truncated);
                prompt.push_str("... [truncated]");
            } else {
                prompt.push_str(text);
            }
            prompt.push_str("\n\n");
        }

        prompt.push_str("Provide your classification as JSON:\n");
        prompt
    }
}

/// Rough estimate: ~4 characters per token.
pub fn estimate_tokens(prompt: &str) -> usize {
    prompt.len() / 4
}
