use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireError;
use inquire::{Confirm, Select, Text};
use std::time::Duration;

use storybook::core::config::{Capability, Config};
use storybook::core::io::NativeStorage;
use storybook::core::state::{Book, BookPage, ImageStyle};
use storybook::services::export::{export_book, ImagePageCapture, PdfExporter};
use storybook::services::session::Session;
use storybook::services::viewer::BookViewer;
use storybook::services::workflow::WorkflowManager;
use storybook::utils::image::decode_data_uri;

const NEXT: &str = "Next page";
const PREV: &str = "Previous page";
const DOWNLOAD: &str = "Download PDF";
const START_OVER: &str = "Start over";
const QUIT: &str = "Quit";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please fix 'config.yml' or remove it to use the defaults.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let workflow = WorkflowManager::from_config(&config)?;
    let session = Session::new(workflow, config.style_catalog());

    if let Capability::Disabled { reason } = session.capability() {
        println!("Story generation is disabled: {}", reason);
        println!("Available illustration styles:");
        for style in session.styles() {
            println!("  - {} ({})", style.name, style.id);
        }
        return Ok(());
    }

    loop {
        let book = match session.book() {
            Some(book) => book,
            None => match create_book(&session).await? {
                Some(book) => book,
                None => break,
            },
        };

        match browse(&book, &config).await? {
            Action::StartOver => session.start_over(),
            Action::Quit => break,
        }
    }

    println!("Goodbye!");
    Ok(())
}

enum Action {
    StartOver,
    Quit,
}

/// Asks for a topic and style and runs one generation. `None` means the user quit.
async fn create_book(session: &Session) -> Result<Option<Book>> {
    loop {
        let topic = match cancellable(
            Text::new("What's your story about?")
                .with_placeholder("e.g., A curious squirrel who discovers a magical, glowing acorn")
                .prompt(),
        )? {
            Some(topic) => topic,
            None => return Ok(None),
        };
        session.set_topic(topic);

        let style = match choose_style(session.styles())? {
            Some(style) => style,
            None => return Ok(None),
        };
        session.select_style(&style.id);

        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.magenta} [{elapsed_precise}] {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));

        let mut record = session.subscribe();
        let run = session.generate(None);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Ok(()) = record.changed() => {
                    let message = record.borrow_and_update().progress_message.clone();
                    if !message.is_empty() {
                        pb.set_message(message);
                    }
                }
            }
        };

        match result {
            Ok(book) => {
                pb.finish_with_message(format!("\"{}\" is ready!", book.title));
                return Ok(Some(book));
            }
            Err(_) => {
                let message = session.state().error.unwrap_or_default();
                pb.abandon_with_message(format!("Oh no! {}", message));
                session.dismiss_error();
                match cancellable(Confirm::new("Try again?").with_default(true).prompt())? {
                    Some(true) => continue,
                    _ => return Ok(None),
                }
            }
        }
    }
}

fn choose_style(styles: &[ImageStyle]) -> Result<Option<ImageStyle>> {
    let options: Vec<String> = styles
        .iter()
        .map(|s| format!("{} - {}", s.name, s.style_prompt_fragment))
        .collect();
    let selection = cancellable(Select::new("Choose an illustration style:", options.clone()).prompt())?;
    Ok(selection.and_then(|choice| {
        options
            .iter()
            .position(|o| *o == choice)
            .map(|i| styles[i].clone())
    }))
}

async fn browse(book: &Book, config: &Config) -> Result<Action> {
    let mut viewer = BookViewer::new(book);
    loop {
        if let Some(page) = viewer.current() {
            print_page(book, page, &viewer.label());
        }

        let mut actions = Vec::new();
        if viewer.has_next() {
            actions.push(NEXT);
        }
        if viewer.has_prev() {
            actions.push(PREV);
        }
        actions.extend([DOWNLOAD, START_OVER, QUIT]);

        let action = match cancellable(Select::new("What next?", actions).prompt())? {
            Some(action) => action,
            None => return Ok(Action::Quit),
        };
        match action {
            NEXT => {
                viewer.next();
            }
            PREV => {
                viewer.prev();
            }
            DOWNLOAD => {
                let report = export_book(
                    book,
                    &ImagePageCapture::new(),
                    &PdfExporter,
                    &NativeStorage::new(),
                    &config.output_folder,
                )
                .await?;
                println!("Saved {} pages to {}", report.page_numbers.len(), report.path);
                if !report.skipped_pages.is_empty() {
                    println!("Some pages could not be rendered: {:?}", report.skipped_pages);
                }
            }
            START_OVER => return Ok(Action::StartOver),
            _ => return Ok(Action::Quit),
        }
    }
}

fn print_page(book: &Book, page: &BookPage, label: &str) {
    println!();
    if page.is_cover {
        println!("=== {} ===", book.title);
    } else {
        println!("{}", page.text);
    }
    match decode_data_uri(&page.image_ref) {
        Ok((mime, bytes)) => println!("[illustration: {}, {} KB]", mime, bytes.len() / 1024),
        Err(_) => println!("[illustration: {}]", page.image_ref),
    }
    println!("Page {}", label);
}

/// Maps Esc / Ctrl-C to `None`.
fn cancellable<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
