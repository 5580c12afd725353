//! Agent implementations and name-based dispatch.

pub mod analysis;
pub mod context;
pub mod docs;
pub mod intent;
pub mod review;
pub mod risk;
pub mod synthesis;
pub mod tests_agent;

use llm_service::{build_system_prompt, CallOpts, ChatMessage, LlmResponse};

use crate::contract::{
    AgentContext, AgentError, AgentOutput, AgentOutputs, AgentResult, AnalysisOutput,
    ContextOutput, ReviewOutput, RiskOutput,
};

/// Run the named agent against its declared inputs.
pub async fn run(
    name: &str,
    ctx: &AgentContext,
    inputs: &AgentOutputs,
) -> AgentResult<AgentOutput> {
    if ctx.cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }
    match name {
        "analysis" => analysis::run(ctx).await,
        "intent" => intent::run(ctx, require_analysis(inputs)?).await,
        "risk" => risk::run(require_analysis(inputs)?),
        "context" => context::run(ctx, require_analysis(inputs)?),
        "review" => review::run(ctx, require_risk(inputs)?, require_context(inputs)?).await,
        "tests" => tests_agent::run(ctx, require_review(inputs)?).await,
        "docs" => docs::run(ctx, require_review(inputs)?).await,
        "synthesis" => synthesis::run(ctx, inputs).await,
        other => Err(AgentError::InvalidInput(format!("unknown agent {other}"))),
    }
}

/// LLM call shared by all agents: system prompt per agent, budget-capped
/// max tokens, bounded retries, cooperative cancellation, usage charging.
pub(crate) async fn call_llm(
    ctx: &AgentContext,
    agent_name: &str,
    user_prompt: String,
    max_tokens: u32,
) -> AgentResult<LlmResponse> {
    let system = build_system_prompt(agent_name, &ctx.prompt_ctx);
    let opts = CallOpts {
        max_tokens: ctx.budget.remaining_for_call(max_tokens),
        temperature: 0.2,
    };
    let response = ctx
        .llm
        .chat_with_retry(
            &[ChatMessage::system(system), ChatMessage::user(user_prompt)],
            &opts,
            &ctx.cancel,
            3,
        )
        .await?;
    ctx.budget.charge(response.usage.total());
    Ok(response)
}

fn require_analysis(inputs: &AgentOutputs) -> AgentResult<&AnalysisOutput> {
    match inputs.get("analysis") {
        Some(AgentOutput::Analysis(a)) => Ok(a),
        _ => Err(AgentError::InvalidInput("analysis output missing".into())),
    }
}

fn require_risk(inputs: &AgentOutputs) -> AgentResult<&RiskOutput> {
    match inputs.get("risk") {
        Some(AgentOutput::Risk(r)) => Ok(r),
        _ => Err(AgentError::InvalidInput("risk output missing".into())),
    }
}

fn require_context(inputs: &AgentOutputs) -> AgentResult<&ContextOutput> {
    match inputs.get("context") {
        Some(AgentOutput::Context(c)) => Ok(c),
        _ => Err(AgentError::InvalidInput("context output missing".into())),
    }
}

fn require_review(inputs: &AgentOutputs) -> AgentResult<&ReviewOutput> {
    match inputs.get("review") {
        Some(AgentOutput::Review(r)) => Ok(r),
        _ => Err(AgentError::InvalidInput("review output missing".into())),
    }
}
