use serde::{Deserialize, Serialize};

/// Number of story pages every generated book carries (cover excluded).
pub const STORY_PAGE_COUNT: usize = 10;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageStyle {
    pub id: String,
    pub name: String,
    #[serde(alias = "previewUrl")]
    pub preview_ref: String,
    /// Fragment prepended to every illustration prompt.
    #[serde(alias = "prompt")]
    pub style_prompt_fragment: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryPage {
    pub page_number: u32,
    #[serde(rename = "text")]
    pub narrative_text: String,
    #[serde(rename = "imagePrompt")]
    pub illustration_prompt: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryResult {
    pub title: String,
    pub character_description: String,
    #[serde(default)]
    pub pages: Vec<StoryPage>,
}

impl StoryResult {
    /// Checks the generator contract and puts pages into ascending order.
    ///
    /// A story is accepted only with a non-empty title and character
    /// description and exactly ten pages numbered 1..=10.
    pub fn validated(mut self) -> Result<Self, String> {
        if self.title.trim().is_empty() {
            return Err("story has an empty title".to_string());
        }
        if self.character_description.trim().is_empty() {
            return Err("story has an empty character description".to_string());
        }
        if self.pages.len() != STORY_PAGE_COUNT {
            return Err(format!(
                "expected {} pages, got {}",
                STORY_PAGE_COUNT,
                self.pages.len()
            ));
        }

        self.pages.sort_by_key(|p| p.page_number);
        for (i, page) in self.pages.iter().enumerate() {
            let expected = i as u32 + 1;
            if page.page_number != expected {
                return Err(format!(
                    "page numbers must be 1..={} without gaps or duplicates (found {} where {} was expected)",
                    STORY_PAGE_COUNT, page.page_number, expected
                ));
            }
        }
        Ok(self)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BookPage {
    /// 0 is the cover, 1..=10 are story pages.
    pub page_number: u32,
    pub text: String,
    pub image_ref: String,
    pub is_cover: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Book {
    pub title: String,
    pub pages: Vec<BookPage>,
}

/// The single mutable session record read by the front end.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub topic: String,
    pub selected_style: Option<ImageStyle>,
    pub is_loading: bool,
    pub progress_message: String,
    pub book: Option<Book>,
    pub error: Option<String>,
}
