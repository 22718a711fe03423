//! Prompt registrations.

use anyhow::Result;
use rmcp_protocol::{ContentItem, PromptArgument, PromptGetResult, PromptMessage};
use rmcp_server::{Prompt, PromptRegistry, RequestContext};
use serde_json::Value;
use std::sync::Arc;

pub(super) fn register_prompts(registry: &mut PromptRegistry) -> Result<()> {
    registry.register(Prompt {
        name: "analyze_dataset".to_string(),
        description: Some(
            "Guided exploratory analysis of a dataset using the statistical tools".to_string(),
        ),
        arguments: vec![
            PromptArgument {
                name: "dataset".to_string(),
                description: Some("Path to the CSV dataset to analyze".to_string()),
                required: true,
            },
            PromptArgument {
                name: "focus".to_string(),
                description: Some("Optional question or variable of interest".to_string()),
                required: false,
            },
        ],
        renderer: Arc::new(|_ctx: RequestContext, args: Value| {
            Box::pin(async move {
                let dataset = args["dataset"].as_str().unwrap_or_default().to_string();
                let focus = args["focus"].as_str().map(|s| s.to_string());

                let mut text = format!(
                    "Analyze the dataset at `{}`.\n\n\
                     1. Start with `descriptive_stats` to understand each variable.\n\
                     2. Check pairwise relationships with `correlation`.\n\
                     3. Plot the key variables with `histogram`.\n\
                     4. If a response variable emerges, fit it with `linear_model` \
                        and report coefficients with their uncertainty.",
                    dataset
                );
                if let Some(focus) = focus {
                    text.push_str(&format!("\n\nFocus the analysis on: {}", focus));
                }

                Ok(PromptGetResult {
                    description: Some("Exploratory analysis workflow".to_string()),
                    messages: vec![PromptMessage {
                        role: "user".to_string(),
                        content: ContentItem::text(text),
                    }],
                })
            })
        }),
    })?;

    registry.register(Prompt {
        name: "interpret_model".to_string(),
        description: Some("Interpret a fitted model's output for a non-statistician".to_string()),
        arguments: vec![PromptArgument {
            name: "model_summary".to_string(),
            description: Some("The structured output of a linear_model call".to_string()),
            required: true,
        }],
        renderer: Arc::new(|_ctx: RequestContext, args: Value| {
            Box::pin(async move {
                let summary = args["model_summary"].as_str().unwrap_or_default().to_string();
                let text = format!(
                    "Explain this fitted model to a non-statistician. State what each \
                     coefficient means in the units of the data, which effects are \
                     distinguishable from noise, and what the fit quality implies about \
                     predictions:\n\n{}",
                    summary
                );
                Ok(PromptGetResult {
                    description: Some("Model interpretation".to_string()),
                    messages: vec![PromptMessage {
                        role: "user".to_string(),
                        content: ContentItem::text(text),
                    }],
                })
            })
        }),
    })?;

    Ok(())
}
