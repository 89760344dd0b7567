use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::error::{Error, Result};

/// Palette handed out to new classes in order.
pub const DEFAULT_COLORS: &[&str] =
    &["#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#00FFFF", "#FF00FF"];

/// One object class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub uid: u32,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub default: bool,
}

/// Ordered set of object classes.
///
/// The position of a class in the store is its YOLO class index at export
/// time. Exactly one class is the default; it receives boxes drawn without
/// an explicit class and detector labels that match no class name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStore {
    classes: Vec<ClassInfo>,
}

impl ClassStore {
    /// Build a store from class names. The first name becomes the default.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::Class("at least one class is required".to_string()));
        }

        let mut store = Self { classes: Vec::with_capacity(names.len()) };
        for (i, name) in names.iter().enumerate() {
            let color = store.next_color();
            store.add_class(i as u32, name.as_ref(), &color, i == 0)?;
        }
        Ok(store)
    }

    /// Build a store from fully specified classes, repairing the default flag
    /// so that exactly one class carries it.
    pub fn from_classes(mut classes: Vec<ClassInfo>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::Class("at least one class is required".to_string()));
        }

        match classes.iter().position(|cls| cls.default) {
            Some(first_default) => {
                for (i, cls) in classes.iter_mut().enumerate() {
                    cls.default = i == first_default;
                }
            }
            None => classes[0].default = true,
        }

        let mut store = Self { classes: Vec::with_capacity(classes.len()) };
        for cls in classes {
            store.add_class(cls.uid, &cls.name, &cls.color, cls.default)?;
        }
        Ok(store)
    }

    pub fn add_class(
        &mut self,
        uid: u32,
        name: &str,
        color: &str,
        is_default: bool,
    ) -> Result<&ClassInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Class("class name must not be empty".to_string()));
        }
        if self.classes.iter().any(|cls| cls.uid == uid) {
            return Err(Error::Class(format!("class with uid {} already exists", uid)));
        }
        if self.classes.iter().any(|cls| cls.name == name) {
            return Err(Error::Class(format!("class named '{}' already exists", name)));
        }
        if is_default && self.classes.iter().any(|cls| cls.default) {
            return Err(Error::Class("only one class can be the default class".to_string()));
        }

        debug!("Adding class {} '{}' ({})", uid, name, color);
        self.classes.push(ClassInfo {
            uid,
            name: name.to_string(),
            color: color.to_string(),
            default: is_default,
        });
        Ok(&self.classes[self.classes.len() - 1])
    }

    /// Append a class with the next free uid, the given name and the next
    /// palette color.
    pub fn push_named(&mut self, name: &str) -> Result<&ClassInfo> {
        let uid = self.next_uid();
        let color = self.next_color();
        self.add_class(uid, name, &color, false)
    }

    /// Delete a class. If it was the default, the first remaining class
    /// takes over.
    pub fn delete_class(&mut self, uid: u32) -> Result<ClassInfo> {
        let position = self.position(uid)?;
        if self.classes.len() == 1 {
            return Err(Error::Class("cannot delete the last remaining class".to_string()));
        }

        let removed = self.classes.remove(position);
        if removed.default {
            self.classes[0].default = true;
            info!(
                "Default class '{}' deleted, '{}' is the new default",
                removed.name, self.classes[0].name
            );
        }
        Ok(removed)
    }

    pub fn rename(&mut self, uid: u32, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Class("class name must not be empty".to_string()));
        }
        if self.classes.iter().any(|cls| cls.name == name && cls.uid != uid) {
            return Err(Error::Class(format!("class named '{}' already exists", name)));
        }
        let position = self.position(uid)?;
        self.classes[position].name = name.to_string();
        Ok(())
    }

    pub fn set_color(&mut self, uid: u32, color: &str) -> Result<()> {
        let position = self.position(uid)?;
        self.classes[position].color = color.to_string();
        Ok(())
    }

    pub fn set_default_uid(&mut self, uid: u32) -> Result<()> {
        let position = self.position(uid)?;
        for (i, cls) in self.classes.iter_mut().enumerate() {
            cls.default = i == position;
        }
        Ok(())
    }

    pub fn default_uid(&self) -> u32 {
        self.default_class().uid
    }

    pub fn default_class(&self) -> &ClassInfo {
        // The store is never empty and always has exactly one default.
        self.classes
            .iter()
            .find(|cls| cls.default)
            .unwrap_or(&self.classes[0])
    }

    pub fn get(&self, uid: u32) -> Option<&ClassInfo> {
        self.classes.iter().find(|cls| cls.uid == uid)
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.get(uid).is_some()
    }

    pub fn name(&self, uid: u32) -> Option<&str> {
        self.get(uid).map(|cls| cls.name.as_str())
    }

    pub fn color(&self, uid: u32) -> Option<&str> {
        self.get(uid).map(|cls| cls.color.as_str())
    }

    pub fn uid_of(&self, name: &str) -> Option<u32> {
        self.classes.iter().find(|cls| cls.name == name).map(|cls| cls.uid)
    }

    /// YOLO class index of a class.
    pub fn index_of(&self, uid: u32) -> Option<usize> {
        self.classes.iter().position(|cls| cls.uid == uid)
    }

    /// Map a detector label to a class uid, falling back to the default class.
    pub fn resolve_label(&self, label: &str) -> u32 {
        match self.uid_of(label) {
            Some(uid) => uid,
            None => {
                debug!("Unknown label '{}', using default class", label);
                self.default_uid()
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.classes.iter().map(|cls| cls.name.as_str()).collect()
    }

    pub fn next_uid(&self) -> u32 {
        self.classes.iter().map(|cls| cls.uid).max().map_or(0, |max| max + 1)
    }

    pub fn next_color(&self) -> String {
        DEFAULT_COLORS[self.classes.len() % DEFAULT_COLORS.len()].to_string()
    }

    /// Next name in the "Class N" scheme that is not taken yet.
    pub fn next_class_name(&self) -> String {
        let mut n = self.classes.len() + 1;
        loop {
            let name = format!("Class {}", n);
            if self.uid_of(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassInfo> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn position(&self, uid: u32) -> Result<usize> {
        self.index_of(uid)
            .ok_or_else(|| Error::Class(format!("no class with uid {}", uid)))
    }
}

impl<'a> IntoIterator for &'a ClassStore {
    type Item = &'a ClassInfo;
    type IntoIter = std::slice::Iter<'a, ClassInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
