// ABOUTME: Quick-start prompt templates offered next to the prompt input
// ABOUTME: Each template prefixes the user's details with a fixed request

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptTemplate {
    CloneScreenshot,
    ImportFigma,
    UploadProject,
    LandingPage,
    SignUpForm,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 5] = [
        PromptTemplate::CloneScreenshot,
        PromptTemplate::ImportFigma,
        PromptTemplate::UploadProject,
        PromptTemplate::LandingPage,
        PromptTemplate::SignUpForm,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PromptTemplate::CloneScreenshot => "Clone a Screenshot",
            PromptTemplate::ImportFigma => "Import from Figma",
            PromptTemplate::UploadProject => "Upload a Project",
            PromptTemplate::LandingPage => "Landing Page",
            PromptTemplate::SignUpForm => "Sign Up Form",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            PromptTemplate::CloneScreenshot => "I want to clone this screenshot:",
            PromptTemplate::ImportFigma => "I want to import this Figma design:",
            PromptTemplate::UploadProject => "I want to upload a project:",
            PromptTemplate::LandingPage => "Help me create a landing page with these requirements:",
            PromptTemplate::SignUpForm => "I need a sign up form with these fields:",
        }
    }

    /// Identifier accepted on the command line
    pub fn slug(&self) -> &'static str {
        match self {
            PromptTemplate::CloneScreenshot => "clone-screenshot",
            PromptTemplate::ImportFigma => "import-figma",
            PromptTemplate::UploadProject => "upload-project",
            PromptTemplate::LandingPage => "landing-page",
            PromptTemplate::SignUpForm => "sign-up-form",
        }
    }

    /// Compose a prompt from this template and the user's details
    pub fn apply(&self, details: &str) -> String {
        let details = details.trim();
        if details.is_empty() {
            self.prefix().to_string()
        } else {
            format!("{} {}", self.prefix(), details)
        }
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PromptTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        PromptTemplate::ALL
            .into_iter()
            .find(|t| t.slug() == wanted || t.label().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown template '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_apply_appends_details() {
        assert_eq!(
            PromptTemplate::SignUpForm.apply("  email, password "),
            "I need a sign up form with these fields: email, password"
        );
        assert_eq!(
            PromptTemplate::UploadProject.apply(""),
            "I want to upload a project:"
        );
    }

    #[rstest]
    #[case("landing-page", PromptTemplate::LandingPage)]
    #[case("Import from Figma", PromptTemplate::ImportFigma)]
    #[case("CLONE-SCREENSHOT", PromptTemplate::CloneScreenshot)]
    fn test_parse(#[case] input: &str, #[case] expected: PromptTemplate) {
        assert_eq!(input.parse::<PromptTemplate>(), Ok(expected));
    }

    #[test]
    fn test_unknown_template() {
        assert!("dashboard".parse::<PromptTemplate>().is_err());
    }
}
