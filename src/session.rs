/// Annotation session
///
/// Walks an ordered list of images one at a time. The current image has a
/// mutable working set of boxes; advancing copies it into the finalized
/// annotation set. Detector suggestions are computed lazily and cached for
/// the lifetime of the session.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::bbox::{Annotation, BoxGeometry};
use crate::classes::{ClassInfo, ClassStore};
use crate::error::{Error, Result};
use crate::file_io::ImageRef;
use crate::oracle::{self, DetectionModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Index of the image being annotated
    Browsing(usize),
    /// Every image has been advanced past. Terminal.
    Complete,
}

/// Finalized boxes for every image of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSet {
    images: Vec<ImageRef>,
    boxes: BTreeMap<usize, Vec<Annotation>>,
    ready: BTreeSet<usize>,
}

impl AnnotationSet {
    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    /// Boxes for the image at `index`; empty for images without boxes.
    pub fn get(&self, index: usize) -> &[Annotation] {
        self.boxes.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Images in session order with their boxes.
    pub fn iter(&self) -> impl Iterator<Item = (&ImageRef, &[Annotation])> + '_ {
        self.images
            .iter()
            .enumerate()
            .map(move |(index, image)| (image, self.get(index)))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn total_boxes(&self) -> usize {
        self.boxes.values().map(Vec::len).sum()
    }

    pub fn is_ready(&self, index: usize) -> bool {
        self.ready.contains(&index)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}

type CachedSuggestions = std::result::Result<Vec<Annotation>, String>;

pub struct AnnotationSession {
    images: Vec<ImageRef>,
    classes: ClassStore,
    model: Option<Box<dyn DetectionModel>>,
    min_score: f32,
    state: SessionState,
    working: Vec<Annotation>,
    finalized: BTreeMap<usize, Vec<Annotation>>,
    ready: BTreeSet<usize>,
    // Keyed by image path; failures are cached as their message.
    suggestions: HashMap<PathBuf, CachedSuggestions>,
}

impl AnnotationSession {
    pub fn new(
        images: Vec<ImageRef>,
        classes: ClassStore,
        model: Option<Box<dyn DetectionModel>>,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(Error::OutOfRange("a session needs at least one image".to_string()));
        }

        info!(
            "Starting session with {} images, {} classes, model: {}",
            images.len(),
            classes.len(),
            model.as_ref().map_or("none", |m| m.name())
        );

        Ok(Self {
            images,
            classes,
            model,
            min_score: 0.0,
            state: SessionState::Browsing(0),
            working: Vec::new(),
            finalized: BTreeMap::new(),
            ready: BTreeSet::new(),
            suggestions: HashMap::new(),
        })
    }

    /// Suggestions scoring below `min_score` are dropped.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            SessionState::Browsing(index) => Some(index),
            SessionState::Complete => None,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn classes(&self) -> &ClassStore {
        &self.classes
    }

    /// Removing classes goes through [`Self::remove_class`] so that boxes
    /// never point at a class that no longer exists.
    pub fn classes_mut(&mut self) -> &mut ClassStore {
        &mut self.classes
    }

    /// Number of finalized images and the total number of images.
    pub fn progress(&self) -> (usize, usize) {
        (self.finalized.len(), self.images.len())
    }

    pub fn current_image(&self) -> Result<&ImageRef> {
        let index = self.browsing_index()?;
        Ok(&self.images[index])
    }

    pub fn working_set(&self) -> &[Annotation] {
        &self.working
    }

    /// Detector suggestions for the current image.
    ///
    /// The detector runs at most once per image; later calls return the
    /// cached result, including a cached failure.
    pub fn suggestions_for_current(&mut self) -> Result<&[Annotation]> {
        let index = self.browsing_index()?;
        let image = &self.images[index];
        let model = self.model.as_deref();
        let classes = &self.classes;
        let min_score = self.min_score;

        let cached = self
            .suggestions
            .entry(image.path().to_path_buf())
            .or_insert_with(|| match model {
                None => Ok(Vec::new()),
                Some(model) => oracle::suggest(model, image, classes, min_score).map_err(|e| {
                    warn!("{} failed on {}: {}", model.name(), image.name(), e);
                    e.to_string()
                }),
            });

        match cached {
            Ok(suggestions) => Ok(suggestions.as_slice()),
            Err(message) => Err(Error::OracleInvocation {
                path: image.path().to_path_buf(),
                message: message.clone(),
            }),
        }
    }

    /// Append a box to the working set. The class must exist and the box
    /// must have positive size and lie within the current image.
    pub fn accept(&mut self, annotation: Annotation) -> Result<()> {
        let image = self.current_image()?;
        if !self.classes.contains(annotation.class_uid) {
            return Err(Error::Class(format!("no class with uid {}", annotation.class_uid)));
        }
        annotation.geometry.validate(image.width(), image.height())?;

        debug!("Accepted box {:?} on {}", annotation, image.name());
        self.working.push(annotation);
        Ok(())
    }

    /// Remove the first working-set box equal to `annotation`. Returns
    /// whether anything was removed.
    pub fn discard(&mut self, annotation: &Annotation) -> bool {
        match self.working.iter().position(|a| a == annotation) {
            Some(position) => {
                self.working.remove(position);
                true
            }
            None => false,
        }
    }

    /// Add a box drawn by the user, in the default class unless one is given.
    pub fn add_box(
        &mut self,
        geometry: impl Into<BoxGeometry>,
        class_uid: Option<u32>,
    ) -> Result<()> {
        let class_uid = class_uid.unwrap_or_else(|| self.classes.default_uid());
        self.accept(Annotation::drawn(class_uid, geometry))
    }

    pub fn accept_suggestion(&mut self, index: usize) -> Result<()> {
        let suggestion = self
            .suggestions_for_current()?
            .get(index)
            .cloned()
            .ok_or_else(|| Error::OutOfRange(format!("no suggestion #{}", index)))?;
        self.accept(suggestion)
    }

    /// Accept every suggestion for the current image. Returns how many boxes
    /// were added.
    pub fn seed_from_suggestions(&mut self) -> Result<usize> {
        let suggestions = self.suggestions_for_current()?.to_vec();
        let count = suggestions.len();
        for suggestion in suggestions {
            self.accept(suggestion)?;
        }
        Ok(count)
    }

    pub fn delete(&mut self, index: usize) -> Result<Annotation> {
        self.browsing_index()?;
        if index >= self.working.len() {
            return Err(Error::OutOfRange(format!(
                "no box #{} (the image has {})",
                index,
                self.working.len()
            )));
        }
        Ok(self.working.remove(index))
    }

    /// Mark the current image as ready for export.
    pub fn mark_ready(&mut self) -> Result<()> {
        let index = self.browsing_index()?;
        self.ready.insert(index);
        Ok(())
    }

    pub fn is_ready(&self, index: usize) -> bool {
        self.ready.contains(&index)
    }

    /// Delete a class. Boxes of that class move to `reassign_to` when given
    /// and are deleted otherwise, in the working set and in every finalized
    /// image.
    pub fn remove_class(&mut self, uid: u32, reassign_to: Option<u32>) -> Result<ClassInfo> {
        if let Some(target) = reassign_to {
            if target == uid {
                return Err(Error::Class(
                    "cannot reassign boxes to the class being removed".to_string(),
                ));
            }
            if !self.classes.contains(target) {
                return Err(Error::Class(format!("no class with uid {}", target)));
            }
        }

        let removed = self.classes.delete_class(uid)?;

        let relabel = |boxes: &mut Vec<Annotation>| match reassign_to {
            Some(target) => boxes
                .iter_mut()
                .filter(|a| a.class_uid == uid)
                .for_each(|a| a.class_uid = target),
            None => boxes.retain(|a| a.class_uid != uid),
        };
        relabel(&mut self.working);
        self.finalized.values_mut().for_each(relabel);

        // Suggestions always keep their boxes; unknown classes go to the default.
        let fallback = reassign_to.unwrap_or_else(|| self.classes.default_uid());
        for suggestions in self.suggestions.values_mut().filter_map(|s| s.as_mut().ok()) {
            suggestions
                .iter_mut()
                .filter(|a| a.class_uid == uid)
                .for_each(|a| a.class_uid = fallback);
        }

        info!("Removed class '{}'", removed.name);
        Ok(removed)
    }

    /// Finalize the working set and move to the next image, or complete the
    /// session at the last image.
    pub fn advance(&mut self) -> Result<SessionState> {
        let index = self.browsing_index()?;
        self.finalized.insert(index, std::mem::take(&mut self.working));

        self.state = if index + 1 < self.images.len() {
            self.working = self.finalized.get(&(index + 1)).cloned().unwrap_or_default();
            SessionState::Browsing(index + 1)
        } else {
            info!("All {} images processed", self.images.len());
            SessionState::Complete
        };
        Ok(self.state)
    }

    /// Go back to the previous image and re-open its finalized boxes.
    ///
    /// Unfinalized edits to the current image are dropped. Changes to the
    /// re-opened image are only kept once it is advanced past again. A no-op
    /// at the first image.
    pub fn retreat(&mut self) -> Result<SessionState> {
        let index = self.browsing_index()?;
        if index == 0 {
            return Ok(self.state);
        }

        let finalized = self.finalized.get(&index).map(Vec::as_slice).unwrap_or(&[]);
        if self.working.as_slice() != finalized {
            warn!(
                "Dropping unsaved changes to {} ({} boxes in working set)",
                self.images[index].name(),
                self.working.len()
            );
        }

        self.working = self.finalized.get(&(index - 1)).cloned().unwrap_or_default();
        self.state = SessionState::Browsing(index - 1);
        Ok(self.state)
    }

    /// The finalized annotations. Only available once the session is
    /// complete.
    pub fn annotation_set(&self) -> Result<AnnotationSet> {
        self.ensure_complete()?;
        Ok(AnnotationSet {
            images: self.images.clone(),
            boxes: self.finalized.clone(),
            ready: self.ready.clone(),
        })
    }

    pub fn finish(self) -> Result<AnnotationSet> {
        self.ensure_complete()?;
        Ok(AnnotationSet {
            images: self.images,
            boxes: self.finalized,
            ready: self.ready,
        })
    }

    fn ensure_complete(&self) -> Result<()> {
        match self.state {
            SessionState::Complete => Ok(()),
            SessionState::Browsing(index) => Err(Error::SessionIncomplete {
                remaining: self.images.len() - index,
            }),
        }
    }

    fn browsing_index(&self) -> Result<usize> {
        self.current_index()
            .ok_or_else(|| Error::OutOfRange("the session is complete".to_string()))
    }
}
