//! Prompt composition
//!
//! Every style wraps the same sections: instruction, question, reference
//! material (the rendered context block) and the expected output format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::LlmError;

/// Prompt style for the qualitative batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// Answer strictly from the references
    #[default]
    Baseline,
    /// Reason in bullets first, then answer
    Cot,
    /// Cite reference numbers after every sentence
    Citation,
}

impl PromptStyle {
    pub const ALL: [PromptStyle; 3] = [Self::Baseline, Self::Cot, Self::Citation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Cot => "cot",
            Self::Citation => "citation",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Baseline => {
                "당신은 역사적 사실에 근거해 질문에 답하는 역사 전문가입니다. \
                 아래 '참고 자료'에 있는 내용만 사용해 답변하고, 자료에 없는 내용은 포함하지 마세요. \
                 답변은 한국어로 작성하세요."
            },
            Self::Cot => {
                "당신은 역사 전문가입니다. 아래 '참고 자료'만 사용해 질문에 답하세요. \
                 먼저 자료를 검토하며 생각의 흐름을 bullet로 정리하고 참고한 자료 번호를 함께 적으세요. \
                 마지막에 최종 답변을 간결하게 제시하세요."
            },
            Self::Citation => {
                "당신은 역사 전문가입니다. 아래 '참고 자료'에 나오는 정보만 사용해 질문에 답하세요. \
                 각 문장 끝에 참고한 자료 번호를 [자료 n] 형식으로 표시하고, \
                 자료에 없는 내용은 추론하지 마세요. 답변은 간결한 문단으로 작성하세요."
            },
        }
    }

    fn output_format(&self) -> &'static str {
        match self {
            Self::Cot => "## 사고 과정\n- 단계별로 생각을 정리하세요.\n\n## 최종 답변",
            Self::Baseline | Self::Citation => "[답변]",
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptStyle {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "cot" => Ok(Self::Cot),
            "citation" => Ok(Self::Citation),
            other => Err(LlmError::Configuration(format!(
                "unknown prompt style '{}', expected one of baseline, cot, citation",
                other
            ))),
        }
    }
}

/// Compose the generation prompt around a rendered context block
pub fn build_prompt(question: &str, context: &str, style: PromptStyle) -> String {
    format!(
        "{}\n\n[질문]\n{}\n\n[참고 자료]\n{}\n\n[출력 형식]\n{}\n",
        style.instruction(),
        question.trim(),
        context,
        style.output_format()
    )
}
