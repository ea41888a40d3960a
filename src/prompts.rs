/// Render the invoice analysis prompt with the policy text, the extracted
/// invoice text and the employee name.
pub fn render_analysis_prompt(policy: &str, invoice_text: &str, employee_name: &str) -> String {
    format!(
        r#"Analyze the following invoice based on the provided HR reimbursement policy.
Extract the invoice date if available.

**HR Policy:**
{policy}

**Invoice:**
{invoice_text}

**Employee Name:** {employee_name}

Determine the reimbursement status and provide a detailed reason. The status must be one of: "Fully Reimbursed", "Partially Reimbursed", or "Declined".

Provide the analysis in a JSON format with the following keys:
- "reimbursement_status": (string, one of "Fully Reimbursed", "Partially Reimbursed", "Declined")
- "reason": (string, detailed explanation for the status)
- "invoice_date": (string, date of the invoice in YYYY-MM-DD format, or null if not found)

**JSON Analysis:**
"#
    )
}

/// Render the Q&A prompt with the retrieved context and the user's question.
pub fn render_chat_prompt(context: &str, question: &str) -> String {
    format!(
        r#"Answer the following question based on the provided context.

**Context:**
{context}

**Question:**
{question}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_substitutes_all_three_fields() {
        let prompt = render_analysis_prompt("max 50 EUR per meal", "dinner 42 EUR", "Jane Doe");
        assert!(prompt.contains("max 50 EUR per meal"));
        assert!(prompt.contains("dinner 42 EUR"));
        assert!(prompt.contains("**Employee Name:** Jane Doe"));
    }

    #[test]
    fn chat_prompt_substitutes_context_and_question() {
        let prompt = render_chat_prompt("ctx block", "was the taxi reimbursed?");
        assert!(prompt.contains("ctx block"));
        assert!(prompt.contains("was the taxi reimbursed?"));
    }
}
