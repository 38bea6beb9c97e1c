//! Instruction template wrapped around every user prompt.

use std::path::Path;

/// Sent to the client before generation starts, and appended to the model
/// prompt so the model continues the document instead of starting over.
pub const HTML_PREAMBLE: &str = r#"<html><head><link href="https://cdn.jsdelivr.net/npm/daisyui@3.1.6/dist/full.css" rel="stylesheet" type="text/css" /><script defer src="https://cdn.jsdelivr.net/npm/alpinejs@3.12.2/dist/cdn.min.js"></script><script src="https://cdn.tailwindcss.com?plugins=forms,typography,aspect-ratio"></script><title>Generated content</title><body class="p-4 md:p-8">"#;

/// Reference notes for the UI toolkit loaded by the preamble.
pub const DEFAULT_TOOLKIT_DOCS: &str = r#"# Alpine.js
Declare reactive state with x-data="{ open: false }", bind attributes with :attr,
listen to events with @click, render lists with <template x-for="item in items">,
toggle visibility with x-show and conditionally render with <template x-if>.

# Tailwind CSS
Style every element with utility classes (flex, grid, gap-4, p-4, text-lg, rounded-xl, shadow).
Use responsive prefixes (md:, lg:) for layout changes.

# daisyUI
Component classes on top of Tailwind: btn, btn-primary, card, card-body, card-title,
navbar, hero, hero-content, badge, input, input-bordered, modal, tabs, tab, alert."#;

pub const GUIDELINES: &[&str] = &[
    "Never repeat the instructions, only write the HTML and JavaScript of the app.",
    "All text must be written in English.",
    "Use a responsive layout that adapts to mobile and desktop screens.",
    "Style the page with Tailwind CSS utility classes and daisyUI components only.",
    "To show an image, use <img src=\"/image?caption=photo of something\" /> with a short caption describing it.",
];

pub const DEFAULT_IMAGE_CAPTION: &str = "generic placeholder";

pub const IMAGE_STYLE_TAGS: &[&str] = &[
    "award winning",
    "high resolution",
    "photo realistic",
    "intricate details",
    "beautiful",
    "[trending on artstation]",
];

pub const NEGATIVE_PROMPT: &str =
    "blurry, cropped, watermark, text, signature, deformed, low quality, ugly, duplicate";

/// Loads replacement docs from `path`, falling back to the built-in notes.
pub fn load_docs(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_TOOLKIT_DOCS.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read docs, using built-in notes");
            DEFAULT_TOOLKIT_DOCS.to_string()
        }
    }
}

/// Full model prompt: task, toolkit docs, guidelines, then the preamble as
/// the continuation anchor.
pub fn build_prompt(user_prompt: &str, docs: &str) -> String {
    let guidelines: String = GUIDELINES
        .iter()
        .map(|g| format!("- {g}\n"))
        .collect();

    format!(
        "# Task\nGenerate the following: {user_prompt}\n\
         # Documentation\n{docs}\n\
         # Guidelines\n{guidelines}\
         # HTML Code of the final app:\n{HTML_PREAMBLE}"
    )
}

/// Caption plus the fixed style tags. An absent or blank caption becomes the placeholder.
pub fn build_image_prompt(caption: Option<&str>) -> String {
    let caption = caption
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_IMAGE_CAPTION);

    std::iter::once(caption)
        .chain(IMAGE_STYLE_TAGS.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}
