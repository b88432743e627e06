use crate::diagnoser::AlertContext;

/// Builds the user prompt for one alert. `zh-CN` selects the Chinese
/// template, anything else English.
pub fn build_diagnosis_prompt(context: &AlertContext) -> String {
    let template = if context.locale == "zh-CN" {
        DIAGNOSIS_PROMPT_ZH
    } else {
        DIAGNOSIS_PROMPT_EN
    };

    let condition = match (&context.metric, &context.operator, context.threshold) {
        (Some(metric), Some(op), Some(threshold)) => format!("{metric} {op} {threshold}"),
        (Some(metric), _, _) => metric.clone(),
        _ => "log keyword match".to_string(),
    };
    let runbooks = if context.runbooks.is_empty() {
        "none".to_string()
    } else {
        context.runbooks.join(", ")
    };

    template
        .replace("{{RULE_NAME}}", &context.rule_name)
        .replace("{{TARGET}}", &context.target_id)
        .replace("{{SEVERITY}}", &context.severity.to_string())
        .replace("{{CONDITION}}", &condition)
        .replace("{{VALUE}}", &format_value(context.value))
        .replace("{{RECENT}}", &format_series(&context.recent_values))
        .replace("{{LOG_LINE}}", context.log_line.as_deref().unwrap_or("-"))
        .replace("{{MESSAGE}}", &context.message)
        .replace("{{RUNBOOKS}}", &runbooks)
}

fn format_value(value: Option<f64>) -> String {
    value.map_or("N/A".to_string(), |v| format!("{v:.2}"))
}

fn format_series(values: &[f64]) -> String {
    if values.is_empty() {
        return "N/A".to_string();
    }
    values
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub const SYSTEM_PROMPT: &str =
    "You are a senior site reliability engineer. Answer tersely and only in the requested format.";

const DIAGNOSIS_PROMPT_EN: &str = r#"An alert is firing. Diagnose its most likely root cause.

Rule: {{RULE_NAME}}
Host: {{TARGET}}
Severity: {{SEVERITY}}
Condition: {{CONDITION}}
Current value: {{VALUE}}
Recent values (oldest first): {{RECENT}}
Matched log line: {{LOG_LINE}}
Alert message: {{MESSAGE}}

Available runbooks: {{RUNBOOKS}}

Reply with exactly these four lines and nothing else:
ROOT_CAUSE: <one sentence>
CONFIDENCE: <number between 0 and 1>
RISK_LEVEL: <low|medium|high>
RUNBOOK: <one of the available runbooks, or none>"#;

const DIAGNOSIS_PROMPT_ZH: &str = r#"以下告警正在触发，请判断最可能的根因。

规则：{{RULE_NAME}}
主机：{{TARGET}}
级别：{{SEVERITY}}
条件：{{CONDITION}}
当前值：{{VALUE}}
近期数值（由旧到新）：{{RECENT}}
匹配日志：{{LOG_LINE}}
告警信息：{{MESSAGE}}

可用 runbook：{{RUNBOOKS}}

请严格只输出以下四行（标签保持英文）：
ROOT_CAUSE: <一句话根因>
CONFIDENCE: <0 到 1 之间的数字>
RISK_LEVEL: <low|medium|high>
RUNBOOK: <可用 runbook 之一，或 none>"#;
