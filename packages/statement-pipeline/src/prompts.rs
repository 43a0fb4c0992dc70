//! Prompt templates.
//!
//! Each template is a system prompt plus a user prompt with a single
//! placeholder. Classification templates use `{text}`, the extraction template
//! uses `{statement_text}`.

/// A system/user prompt pair with one substitution placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub user: &'static str,
    pub placeholder: &'static str,
}

impl PromptTemplate {
    /// User prompt with the placeholder replaced by `text`.
    pub fn render_user(&self, text: &str) -> String {
        self.user.replace(self.placeholder, text)
    }
}

pub const DISCLAIMER_PAGE_CLASSIFICATION: PromptTemplate = PromptTemplate {
    name: "disclaimer_page_classification",
    system: r#"You review single pages of Canadian investment account statements.

Decide whether the page should be excluded before data extraction. A page should be excluded when it carries no account data: legal disclaimers, regulatory notices, glossaries, explanations of statement sections, footnotes, tax or sales charge information, marketing, or blank pages.

A page must be kept when it contains any client, account or holdings data: names, addresses, account numbers, account types, balances, market values, quantities, prices, book costs, or cash positions. When in doubt, keep the page.

Respond with a JSON object {"exclude": 1} to exclude the page or {"exclude": 0} to keep it."#,
    user: "PAGE TEXT: \"\"\"{text}\"\"\"",
    placeholder: "{text}",
};

pub const STANDARD_TEXT_CLASSIFICATION: PromptTemplate = PromptTemplate {
    name: "standard_text_classification",
    system: r#"You review excerpts (paragraphs, headings or tables) of Canadian investment account statements converted to markdown.

Decide whether the excerpt is standard boilerplate that can be removed before data extraction: disclaimers, investor protection notices, contact details of the dealer, explanations of columns or sections, footnotes, and generic marketing text.

An excerpt must be kept when it contains any of: the client's name, the statement date or period, an account number or type, an account value, a holdings table or row, a cash balance, or management fees. When in doubt, keep the excerpt.

Respond with a JSON object {"exclude": 1} to remove the excerpt or {"exclude": 0} to keep it."#,
    user: "EXCERPT: \"\"\"{text}\"\"\"",
    placeholder: "{text}",
};

pub const INVESTMENT_STATEMENT_EXTRACTION: PromptTemplate = PromptTemplate {
    name: "investment_statement_extraction",
    system: r#"You are an expert at extracting structured data (JSON) from unstructured text.

You will ensure that the extracted data is accurate. If any information is missing from the statement, represent it as null.

Report every account in the statement. Account types must use one of the allowed values exactly.

The cash balance(s) in the account must be included with the other holdings. For cash, report the description "Cash", the amount as the market value, and the currency. Other fields of a cash holding may be null.

The sum of the market values of an account's holdings, cash included, must equal the account value."#,
    user: "STATEMENT TEXT: \"\"\"{statement_text}\"\"\"",
    placeholder: "{statement_text}",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_placeholder() {
        let rendered = DISCLAIMER_PAGE_CLASSIFICATION.render_user("Important disclaimer");
        assert_eq!(rendered, "PAGE TEXT: \"\"\"Important disclaimer\"\"\"");

        let rendered = INVESTMENT_STATEMENT_EXTRACTION.render_user("| XIU | 100 |");
        assert!(rendered.contains("| XIU | 100 |"));
        assert!(!rendered.contains("{statement_text}"));
    }

    #[test]
    fn test_classification_prompts_ask_for_exclude_flag() {
        for template in [DISCLAIMER_PAGE_CLASSIFICATION, STANDARD_TEXT_CLASSIFICATION] {
            assert!(template.system.contains("\"exclude\""));
            assert!(template.user.contains(template.placeholder));
        }
    }
}
