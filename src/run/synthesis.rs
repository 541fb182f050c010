//! Synthesis Stage
//!
//! Combines worker outputs and fused evidence into the final brief. The
//! generation call runs in streaming mode; deltas are accumulated verbatim so
//! the final text is byte-identical to their concatenation, and the engine
//! replays exactly those deltas onto the wire for the retained iteration.
//!
//! Evidence is packed greedily in ranked order until the character budget is
//! reached, always cutting at a record boundary. Worker outputs are condensed
//! to a fixed per-worker excerpt.

use std::sync::Arc;

use futures_util::StreamExt;
use kestrel_core::types::{Framework, FusedEvidence, WorkerResult, WorkerStatus};
use kestrel_llm::GenerationProvider;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::{Cache, CacheKind};
use crate::error::{AppError, AppResult};
use crate::workers::render_evidence;

/// Per-worker excerpt length inside the synthesis prompt.
const WORKER_EXCERPT_CHARS: usize = 1_000;

/// A completed synthesis: the full text and the exact delta sequence that
/// produced it.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutput {
    pub text: String,
    pub deltas: Vec<String>,
    /// True when the stream was cut short by cancellation.
    pub cancelled: bool,
}

/// Structural scaffold for a framework.
fn framework_scaffold(framework: Framework) -> &'static str {
    match framework {
        Framework::Pmesii => {
            "Structure the brief under six labeled sections: Political, \
             Military, Economic, Social, Information, Infrastructure. Close \
             with a one-paragraph stability assessment."
        }
        Framework::Dime => {
            "Structure the brief under four labeled sections: Diplomatic, \
             Information, Military, Economic."
        }
        Framework::Swot => {
            "Structure the brief under four labeled sections: Strengths, \
             Weaknesses, Opportunities, Threats."
        }
        Framework::None => "Write the brief as free-flowing analytical prose.",
    }
}

/// Condense one worker result to a labeled excerpt.
fn condense(result: &WorkerResult) -> String {
    let body = match result.status {
        WorkerStatus::Ok => {
            let text = result.output_text.trim();
            if text.chars().count() > WORKER_EXCERPT_CHARS {
                let excerpt: String = text.chars().take(WORKER_EXCERPT_CHARS).collect();
                format!("{}...", excerpt)
            } else {
                text.to_string()
            }
        }
        WorkerStatus::Error => format!("(worker failed: {})", result.output_text),
        WorkerStatus::Skipped => format!("(worker skipped: {})", result.output_text),
    };
    format!("{}:\n{}", result.worker_id.as_str().to_uppercase(), body)
}

/// Assemble the synthesis prompt.
pub fn build_prompt(
    query: &str,
    evidence: Option<&FusedEvidence>,
    worker_results: &[WorkerResult],
    framework: Framework,
    evidence_char_budget: usize,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(
        "You are the synthesis stage of an OSINT analysis platform. Combine \
         the specialist findings and the ranked evidence below into one \
         coherent intelligence brief answering the query. Attribute \
         disagreements between specialists instead of papering over them."
            .to_string(),
    );
    parts.push(format!("Query: {}", query));
    parts.push(framework_scaffold(framework).to_string());

    if !worker_results.is_empty() {
        parts.push("Specialist findings:".to_string());
        for result in worker_results {
            parts.push(condense(result));
        }
    }

    if let Some(evidence) = evidence.filter(|e| !e.is_empty()) {
        let rendered = render_evidence(evidence, evidence_char_budget);
        if !rendered.is_empty() {
            parts.push(format!("Ranked evidence:\n{}", rendered));
        }
    }

    parts.join("\n\n")
}

/// Run the streaming synthesis call, accumulating deltas.
///
/// Cancellation between deltas stops the stream and returns the partial
/// output marked `cancelled`. A stream that errors after producing text
/// returns the partial output; one that errors before any text propagates
/// the failure.
pub async fn synthesize(
    provider: &Arc<dyn GenerationProvider>,
    cache: &Cache,
    model: &str,
    prompt: &str,
    cancel: &CancellationToken,
) -> AppResult<SynthesisOutput> {
    let mut stream = provider.generate_stream(prompt, model).await?;

    let mut output = SynthesisOutput::default();
    loop {
        let delta = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                output.cancelled = true;
                break;
            }
            delta = stream.next() => delta,
        };
        match delta {
            Some(Ok(delta)) => {
                output.text.push_str(&delta);
                output.deltas.push(delta);
            }
            Some(Err(e)) => {
                if output.text.is_empty() {
                    return Err(AppError::Llm(e));
                }
                warn!(
                    target: "kestrel_run",
                    "synthesis stream broke after {} chars: {}",
                    output.text.len(),
                    e
                );
                break;
            }
            None => break,
        }
    }

    // The accumulated text is reusable by future non-streaming calls with
    // the same prompt; the stream itself is never cached.
    if !output.cancelled && !output.text.is_empty() {
        let key = format!("{}\u{1f}{}", model, prompt);
        if let Err(e) = cache.put_json(CacheKind::Generate, &key, &output.text).await {
            warn!(target: "kestrel_run", "failed to cache synthesis text: {}", e);
        }
    }

    Ok(output)
}
