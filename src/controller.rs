//! Terminal controller: turns typed commands into session calls and renders
//! a text view of the current image.

use std::fmt::Write as _;
use std::str::FromStr;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::bbox::{Annotation, BoundingBox, BoxGeometry, PixelRect};
use crate::error::{Error, Result};
use crate::session::{AnnotationSession, SessionState};

pub const HELP: &str = "\
Commands:
  next, n                       finalize this image and go to the next one
  prev, p                       go back one image (unsaved changes are dropped)
  suggest, s                    show detector suggestions
  accept <i>, a <i>             accept suggestion #i
  seed                          accept all suggestions
  box <class> <x> <y> <w> <h>   add a box, normalized center form (class '-' = default)
  box <class> <x> <y> <w> <h> px
                                add a box, pixel top-left form
  delete <i>, d <i>             delete box #i
  ready, r                      mark this image ready for export
  list, l                       show the current image
  classes                       list classes
  class add <name>              add a class
  class default <name>          make a class the default
  class remove <name> [into <other>]
                                remove a class, deleting or moving its boxes
  help, h                       show this help
  quit, q                       quit without exporting";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Next,
    Prev,
    Suggest,
    Accept(usize),
    Seed,
    Box {
        /// `None` uses the default class
        class: Option<String>,
        geometry: BoxGeometry,
    },
    Delete(usize),
    Ready,
    List,
    Classes,
    ClassAdd(String),
    ClassDefault(String),
    ClassRemove {
        name: String,
        into: Option<String>,
    },
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = tokens.split_first() else {
            return Err("empty command".to_string());
        };

        let command = match (name.to_lowercase().as_str(), args) {
            ("next" | "n", []) => Command::Next,
            ("prev" | "p", []) => Command::Prev,
            ("suggest" | "s", []) => Command::Suggest,
            ("accept" | "a", [index]) => Command::Accept(parse_index(index)?),
            ("seed", []) => Command::Seed,
            ("box", [class, rest @ ..]) => parse_box(class, rest)?,
            ("delete" | "d", [index]) => Command::Delete(parse_index(index)?),
            ("ready" | "r", []) => Command::Ready,
            ("list" | "l", []) => Command::List,
            ("classes", []) => Command::Classes,
            ("class", ["add", class_name]) => Command::ClassAdd(class_name.to_string()),
            ("class", ["default", class_name]) => Command::ClassDefault(class_name.to_string()),
            ("class", ["remove", class_name]) => Command::ClassRemove {
                name: class_name.to_string(),
                into: None,
            },
            ("class", ["remove", class_name, "into", target]) => Command::ClassRemove {
                name: class_name.to_string(),
                into: Some(target.to_string()),
            },
            ("help" | "h" | "?", []) => Command::Help,
            ("quit" | "q" | "exit", []) => Command::Quit,
            _ => {
                return Err(format!(
                    "unknown command or wrong arguments: '{}' (type 'help')",
                    line.trim()
                ))
            }
        };
        Ok(command)
    }
}

fn parse_index(token: &str) -> std::result::Result<usize, String> {
    token
        .trim_start_matches('#')
        .parse()
        .map_err(|_| format!("'{}' is not a box number", token))
}

fn parse_box(class: &str, rest: &[&str]) -> std::result::Result<Command, String> {
    let (numbers, pixel) = match rest {
        [numbers @ .., "px"] => (numbers, true),
        numbers => (numbers, false),
    };
    let values = numbers
        .iter()
        .map(|token| token.parse::<f64>().map_err(|_| format!("'{}' is not a number", token)))
        .collect::<std::result::Result<Vec<f64>, String>>()?;
    let [a, b, c, d] = values[..] else {
        return Err("box needs exactly four numbers: x y w h".to_string());
    };

    let geometry = if pixel {
        BoxGeometry::Pixel(PixelRect::new(a, b, c, d))
    } else {
        BoxGeometry::Normalized(BoundingBox::new(a, b, c, d))
    };
    let class = (class != "-").then(|| class.to_string());
    Ok(Command::Box { class, geometry })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading commands; the text is shown to the user.
    Continue(String),
    /// The last image was finalized.
    Complete,
    Quit,
}

pub struct Controller {
    session: AnnotationSession,
}

impl Controller {
    pub fn new(session: AnnotationSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &AnnotationSession {
        &self.session
    }

    pub fn into_session(self) -> AnnotationSession {
        self.session
    }

    /// Parse and run one line of input. Parse and session errors are
    /// reported back as text.
    pub fn handle_line(&mut self, line: &str) -> Outcome {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(message) => return Outcome::Continue(message),
        };
        match self.handle(command) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Command failed: {}", e);
                Outcome::Continue(format!("error: {}", e))
            }
        }
    }

    pub fn handle(&mut self, command: Command) -> Result<Outcome> {
        let text = match command {
            Command::Next => {
                if self.session.advance()? == SessionState::Complete {
                    return Ok(Outcome::Complete);
                }
                self.render()
            }
            Command::Prev => {
                self.session.retreat()?;
                self.render()
            }
            Command::Suggest => self.render_suggestions()?,
            Command::Accept(index) => {
                self.session.accept_suggestion(index)?;
                self.render()
            }
            Command::Seed => {
                let added = self.session.seed_from_suggestions()?;
                format!("added {} suggested boxes\n{}", added, self.render())
            }
            Command::Box { class, geometry } => {
                let class_uid = match class {
                    Some(name) => Some(self.class_uid(&name)?),
                    None => None,
                };
                self.session.add_box(geometry, class_uid)?;
                self.render()
            }
            Command::Delete(index) => {
                self.session.delete(index)?;
                self.render()
            }
            Command::Ready => {
                self.session.mark_ready()?;
                self.render()
            }
            Command::List => self.render(),
            Command::Classes => self.render_classes(),
            Command::ClassAdd(name) => {
                let uid = self.session.classes_mut().push_named(&name)?.uid;
                info!("Added class '{}' with uid {}", name, uid);
                self.render_classes()
            }
            Command::ClassDefault(name) => {
                let uid = self.class_uid(&name)?;
                self.session.classes_mut().set_default_uid(uid)?;
                self.render_classes()
            }
            Command::ClassRemove { name, into } => {
                let uid = self.class_uid(&name)?;
                let target = match into {
                    Some(target) => Some(self.class_uid(&target)?),
                    None => None,
                };
                self.session.remove_class(uid, target)?;
                self.render_classes()
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Continue(text))
    }

    /// Accept every suggestion, mark the image ready and move on, until the
    /// session is complete. Returns the number of boxes accepted.
    pub fn run_auto(&mut self) -> Result<usize> {
        let mut total = 0;
        while !self.session.is_complete() {
            match self.session.seed_from_suggestions() {
                Ok(added) => total += added,
                Err(Error::OracleInvocation { path, message }) => {
                    warn!("No suggestions for {}: {}", path.display(), message);
                }
                Err(e) => return Err(e),
            }
            self.session.mark_ready()?;
            self.session.advance()?;
        }
        info!("Auto-annotated {} images with {} boxes", self.session.len(), total);
        Ok(total)
    }

    /// Text view of the current image and its working set.
    pub fn render(&mut self) -> String {
        let Ok(image) = self.session.current_image() else {
            return "all images processed".to_string();
        };
        let (width, height) = image.dimensions();
        let position = self.session.current_index().map_or(0, |index| index + 1);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "[{}/{}] {} ({}x{}){}",
            position,
            self.session.len(),
            image.name(),
            width,
            height,
            if position > 0 && self.session.is_ready(position - 1) { " ready" } else { "" }
        );

        if self.session.working_set().is_empty() {
            let _ = writeln!(out, "  no boxes");
        }
        for (index, annotation) in self.session.working_set().iter().enumerate() {
            let _ = writeln!(out, "  #{} {}", index, self.describe(annotation, width, height));
        }

        let suggestions = match self.session.suggestions_for_current() {
            Ok(suggestions) => format!("{} suggestion(s), 'suggest' to show", suggestions.len()),
            Err(e) => format!("suggestions unavailable: {}", e),
        };
        let _ = write!(out, "  {}", suggestions);
        out
    }

    fn render_suggestions(&mut self) -> Result<String> {
        let (width, height) = self.session.current_image()?.dimensions();
        let suggestions = self.session.suggestions_for_current()?.to_vec();
        if suggestions.is_empty() {
            return Ok("no suggestions".to_string());
        }

        let mut out = String::new();
        for (index, annotation) in suggestions.iter().enumerate() {
            let _ = writeln!(out, "  #{} {}", index, self.describe(annotation, width, height));
        }
        Ok(out.trim_end().to_string())
    }

    fn render_classes(&self) -> String {
        let mut out = String::new();
        for (index, class) in self.session.classes().iter().enumerate() {
            let _ = writeln!(
                out,
                "  {} {} ({}, uid {}){}",
                index,
                class.name,
                class.color,
                class.uid,
                if class.default { " default" } else { "" }
            );
        }
        out.trim_end().to_string()
    }

    fn describe(&self, annotation: &Annotation, width: u32, height: u32) -> String {
        let bbox = annotation.normalized(width, height);
        let class_name = self.session.classes().name(annotation.class_uid).unwrap_or("?");
        let mut text = format!(
            "{} {:.4} {:.4} {:.4} {:.4}",
            class_name, bbox.x_center, bbox.y_center, bbox.width, bbox.height
        );
        if let Some(score) = annotation.score {
            let _ = write!(text, " (score {:.2})", score);
        }
        text
    }

    fn class_uid(&self, name: &str) -> Result<u32> {
        self.session
            .classes()
            .uid_of(name)
            .ok_or_else(|| Error::Class(format!("no class named '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassStore;
    use crate::file_io::ImageRef;
    use crate::oracle::MockModel;

    fn controller(n: usize) -> Controller {
        let images = (0..n).map(|i| ImageRef::new(format!("/data/{}.jpg", i), 200, 100)).collect();
        let classes = ClassStore::from_names(&["buoy", "boat"]).unwrap();
        let model = MockModel::new(
            vec![[0.0, 0.0, 320.0, 320.0], [320.0, 320.0, 640.0, 640.0]],
            vec!["boat".to_string(), "buoy".to_string()],
            Some(vec![0.9, 0.6]),
            (640, 640),
        );
        let session = AnnotationSession::new(images, classes, Some(Box::new(model))).unwrap();
        Controller::new(session)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("n".parse::<Command>(), Ok(Command::Next));
        assert_eq!(" Prev ".parse::<Command>(), Ok(Command::Prev));
        assert_eq!("a 2".parse::<Command>(), Ok(Command::Accept(2)));
        assert_eq!("d #1".parse::<Command>(), Ok(Command::Delete(1)));
        assert_eq!(
            "box boat 40 30 20 40 px".parse::<Command>(),
            Ok(Command::Box {
                class: Some("boat".to_string()),
                geometry: BoxGeometry::Pixel(PixelRect::new(40.0, 30.0, 20.0, 40.0)),
            })
        );
        assert_eq!(
            "box - 0.5 0.5 0.2 0.4".parse::<Command>(),
            Ok(Command::Box {
                class: None,
                geometry: BoxGeometry::Normalized(BoundingBox::new(0.5, 0.5, 0.2, 0.4)),
            })
        );
        assert_eq!(
            "class remove boat into buoy".parse::<Command>(),
            Ok(Command::ClassRemove {
                name: "boat".to_string(),
                into: Some("buoy".to_string()),
            })
        );
        assert!("box boat 1 2 3".parse::<Command>().is_err());
        assert!("accept x".parse::<Command>().is_err());
        assert!("jump 3".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn test_handle_drives_session_to_complete() {
        let mut controller = controller(2);
        assert!(matches!(controller.handle_line("a 0"), Outcome::Continue(_)));
        assert!(matches!(controller.handle_line("box buoy 10 10 20 20 px"), Outcome::Continue(_)));
        assert_eq!(controller.session().working_set().len(), 2);
        assert_eq!(controller.handle_line("n"), Outcome::Continue(controller_view_after_next()));
        assert_eq!(controller.handle_line("next"), Outcome::Complete);

        let set = controller.session().annotation_set().unwrap();
        assert_eq!(set.get(0).len(), 2);
        assert_eq!(set.get(0)[0].class_uid, 1);
        assert!(set.get(1).is_empty());
    }

    fn controller_view_after_next() -> String {
        "[2/2] 1.jpg (200x100)\n  no boxes\n  2 suggestion(s), 'suggest' to show".to_string()
    }

    #[test]
    fn test_errors_are_reported_not_fatal() {
        let mut controller = controller(1);
        let Outcome::Continue(text) = controller.handle_line("box whale 0.5 0.5 0.1 0.1") else {
            panic!("expected an error message");
        };
        assert!(text.contains("no class named 'whale'"));

        let Outcome::Continue(text) = controller.handle_line("d 4") else {
            panic!("expected an error message");
        };
        assert!(text.starts_with("error:"));
        assert_eq!(controller.handle_line("q"), Outcome::Quit);
    }

    #[test]
    fn test_class_commands() {
        let mut controller = controller(1);
        controller.handle_line("box boat 0.5 0.5 0.2 0.2");
        controller.handle_line("class add ship");
        controller.handle_line("class default ship");
        assert_eq!(controller.session().classes().default_class().name, "ship");

        controller.handle_line("class remove boat into ship");
        let ship = controller.session().classes().uid_of("ship").unwrap();
        assert_eq!(controller.session().working_set()[0].class_uid, ship);
        assert!(controller.session().classes().uid_of("boat").is_none());
    }

    #[test]
    fn test_run_auto_accepts_everything() {
        let mut controller = controller(3);
        assert_eq!(controller.run_auto().unwrap(), 6);
        let session = controller.into_session();
        assert!(session.is_complete());
        let set = session.finish().unwrap();
        assert_eq!(set.ready_count(), 3);
        assert_eq!(set.total_boxes(), 6);
    }

    #[test]
    fn test_suggest_lists_scores() {
        let mut controller = controller(1);
        let Outcome::Continue(text) = controller.handle_line("s") else {
            panic!("expected suggestions");
        };
        assert!(text.contains("#0 boat 0.2500 0.2500 0.5000 0.5000 (score 0.90)"));
        assert!(text.contains("#1 buoy"));
    }
}
