//! Annotation overlay session.
//!
//! Owns the per-page annotation lists and the interaction state machine. All
//! mutation happens through this type; there is no ambient global state.

use crate::annotation::{
    Annotation, AnnotationId, AnnotationKind, Color, RectangleAnnotation, TextAnnotation,
};
use crate::coords::{pixel_to_percent, ContainerRect, PercentPoint, PercentSize, PixelPoint};
use crate::probe::TextProbeItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_FONT_SIZE_PT: f32 = 4.0;
pub const MAX_FONT_SIZE_PT: f32 = 144.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    #[default]
    View,
    AddText,
    AddRectangle,
    RewriteText,
}

/// What the pointer landed on when a press started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    Container,
    Annotation(AnnotationId),
    /// Index into the current page's probe items.
    TextItem(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { target: PointerTarget, pointer: PixelPoint },
    Move { pointer: PixelPoint },
    Up,
    /// Pointer left the rendering container.
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOutcome {
    Ignored,
    Created(AnnotationId),
    DragStarted(AnnotationId),
    Moved(AnnotationId),
    DragEnded(AnnotationId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    #[error("annotation {0} does not exist")]
    UnknownAnnotation(AnnotationId),
    #[error("annotation {0} is not a {1} annotation")]
    WrongKind(AnnotationId, &'static str),
}

/// Values used for newly created annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayDefaults {
    pub text: String,
    pub font_size_pt: f32,
    pub color: Color,
    pub rectangle_size: PercentSize,
}

impl Default for OverlayDefaults {
    fn default() -> Self {
        Self {
            text: "Text".to_owned(),
            font_size_pt: 12.0,
            color: Color::BLACK,
            rectangle_size: PercentSize::new(10.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragState {
    id: AnnotationId,
    /// Pointer position minus annotation position at drag start.
    grab_dx: f32,
    grab_dy: f32,
}

#[derive(Debug, Clone)]
pub struct OverlaySession {
    mode: InteractionMode,
    pages: BTreeMap<u32, Vec<Annotation>>,
    drag: Option<DragState>,
    selected: Option<AnnotationId>,
    next_id: u64,
    defaults: OverlayDefaults,
}

impl Default for OverlaySession {
    fn default() -> Self {
        Self::new(OverlayDefaults::default())
    }
}

impl OverlaySession {
    pub fn new(defaults: OverlayDefaults) -> Self {
        Self {
            mode: InteractionMode::View,
            pages: BTreeMap::new(),
            drag: None,
            selected: None,
            next_id: 0,
            defaults,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        if self.mode != mode {
            tracing::debug!(from = ?self.mode, to = ?mode, "interaction mode changed");
        }
        self.mode = mode;
    }

    pub fn defaults(&self) -> &OverlayDefaults {
        &self.defaults
    }

    pub fn set_defaults(&mut self, defaults: OverlayDefaults) {
        self.defaults = defaults;
    }

    pub fn selected(&self) -> Option<AnnotationId> {
        self.selected
    }

    pub fn dragging(&self) -> Option<AnnotationId> {
        self.drag.map(|drag| drag.id)
    }

    pub fn annotations_for(&self, page: u32) -> &[Annotation] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pages holding at least one annotation, ascending.
    pub fn pages_with_annotations(&self) -> impl Iterator<Item = (u32, &[Annotation])> + '_ {
        self.pages
            .iter()
            .filter(|(_, annotations)| !annotations.is_empty())
            .map(|(page, annotations)| (*page, annotations.as_slice()))
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.pages.values().flatten().find(|annotation| annotation.id == id)
    }

    pub fn len(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every annotation, e.g. when the document is closed or replaced.
    /// Identifiers keep counting so none is handed out twice.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.drag = None;
        self.selected = None;
        self.mode = InteractionMode::View;
    }

    fn allocate_id(&mut self) -> AnnotationId {
        self.next_id += 1;
        AnnotationId(self.next_id)
    }

    fn insert(&mut self, page: u32, position: PercentPoint, kind: AnnotationKind) -> AnnotationId {
        let id = self.allocate_id();
        let annotation = Annotation { id, page: page.max(1), position: position.clamped(), kind };
        self.pages.entry(annotation.page).or_default().push(annotation);
        self.selected = Some(id);
        tracing::debug!(%id, page, "annotation created");
        id
    }

    fn find_mut(&mut self, id: AnnotationId) -> Result<&mut Annotation, OverlayError> {
        self.pages
            .values_mut()
            .flatten()
            .find(|annotation| annotation.id == id)
            .ok_or(OverlayError::UnknownAnnotation(id))
    }

    fn text_mut(&mut self, id: AnnotationId) -> Result<&mut TextAnnotation, OverlayError> {
        match &mut self.find_mut(id)?.kind {
            AnnotationKind::Text(text) => Ok(text),
            AnnotationKind::Rectangle(_) => Err(OverlayError::WrongKind(id, "text")),
        }
    }

    pub fn place_text(
        &mut self,
        page: u32,
        position: PercentPoint,
        content: impl Into<String>,
    ) -> AnnotationId {
        let kind = AnnotationKind::Text(TextAnnotation {
            content: content.into(),
            font_size_pt: self.defaults.font_size_pt,
            color: self.defaults.color,
            background_patch: false,
            covers: None,
        });
        self.insert(page, position, kind)
    }

    pub fn place_rectangle(
        &mut self,
        page: u32,
        position: PercentPoint,
        size: PercentSize,
    ) -> AnnotationId {
        let kind = AnnotationKind::Rectangle(RectangleAnnotation { size });
        self.insert(page, position, kind)
    }

    /// Create a patched text annotation that rewrites an existing text run.
    pub fn rewrite_text_item(&mut self, page: u32, item: &TextProbeItem) -> AnnotationId {
        let font_size_pt = if item.font_size_pt > 0.0 {
            item.font_size_pt.clamp(MIN_FONT_SIZE_PT, MAX_FONT_SIZE_PT)
        } else {
            self.defaults.font_size_pt
        };

        let kind = AnnotationKind::Text(TextAnnotation {
            content: item.text.clone(),
            font_size_pt,
            color: self.defaults.color,
            background_patch: true,
            covers: Some(item.bounds.size),
        });
        self.insert(page, item.bounds.origin, kind)
    }

    /// Feed one pointer event for `page`.
    pub fn handle_pointer(
        &mut self,
        page: u32,
        event: PointerEvent,
        container: ContainerRect,
        probes: &[TextProbeItem],
    ) -> OverlayOutcome {
        match event {
            PointerEvent::Down { target, pointer } => {
                self.pointer_down(page, target, pixel_to_percent(pointer, container), probes)
            }
            PointerEvent::Move { pointer } => {
                let Some(drag) = self.drag else {
                    return OverlayOutcome::Ignored;
                };
                let at = pixel_to_percent(pointer, container);
                let position = PercentPoint::new(at.x - drag.grab_dx, at.y - drag.grab_dy);
                match self.find_mut(drag.id) {
                    Ok(annotation) => {
                        annotation.position = position;
                        OverlayOutcome::Moved(drag.id)
                    }
                    Err(_) => {
                        self.drag = None;
                        OverlayOutcome::Ignored
                    }
                }
            }
            PointerEvent::Up | PointerEvent::Leave => match self.drag.take() {
                Some(drag) => OverlayOutcome::DragEnded(drag.id),
                None => OverlayOutcome::Ignored,
            },
        }
    }

    fn pointer_down(
        &mut self,
        page: u32,
        target: PointerTarget,
        at: PercentPoint,
        probes: &[TextProbeItem],
    ) -> OverlayOutcome {
        match (target, self.mode) {
            (PointerTarget::Annotation(id), _) => {
                if let Some(active) = self.drag {
                    tracing::warn!(
                        active = %active.id,
                        requested = %id,
                        "drag already in progress"
                    );
                    return OverlayOutcome::Ignored;
                }
                let Some(annotation) = self.get(id) else {
                    return OverlayOutcome::Ignored;
                };
                let (grab_dx, grab_dy) =
                    (at.x - annotation.position.x, at.y - annotation.position.y);
                self.drag = Some(DragState { id, grab_dx, grab_dy });
                self.selected = Some(id);
                OverlayOutcome::DragStarted(id)
            }
            (PointerTarget::Container, InteractionMode::AddText) => {
                let content = self.defaults.text.clone();
                let id = self.place_text(page, at, content);
                self.set_mode(InteractionMode::View);
                OverlayOutcome::Created(id)
            }
            (PointerTarget::Container, InteractionMode::AddRectangle) => {
                let size = self.defaults.rectangle_size;
                let id = self.place_rectangle(page, at, size);
                self.set_mode(InteractionMode::View);
                OverlayOutcome::Created(id)
            }
            (PointerTarget::TextItem(index), InteractionMode::RewriteText) => {
                match probes.get(index) {
                    Some(item) => OverlayOutcome::Created(self.rewrite_text_item(page, item)),
                    None => OverlayOutcome::Ignored,
                }
            }
            (
                PointerTarget::TextItem(_),
                InteractionMode::AddText | InteractionMode::AddRectangle,
            ) => {
                // Text runs sit on top of the container; treat them as the page.
                self.pointer_down(page, PointerTarget::Container, at, probes)
            }
            (PointerTarget::Container | PointerTarget::TextItem(_), _) => {
                self.selected = None;
                OverlayOutcome::Ignored
            }
        }
    }

    pub fn move_to(
        &mut self,
        id: AnnotationId,
        position: PercentPoint,
    ) -> Result<(), OverlayError> {
        self.find_mut(id)?.position = position.clamped();
        Ok(())
    }

    pub fn set_text(
        &mut self,
        id: AnnotationId,
        content: impl Into<String>,
    ) -> Result<(), OverlayError> {
        self.text_mut(id)?.content = content.into();
        Ok(())
    }

    pub fn set_font_size(&mut self, id: AnnotationId, size_pt: f32) -> Result<(), OverlayError> {
        let size_pt = if size_pt.is_finite() {
            size_pt.clamp(MIN_FONT_SIZE_PT, MAX_FONT_SIZE_PT)
        } else {
            self.defaults.font_size_pt
        };
        self.text_mut(id)?.font_size_pt = size_pt;
        Ok(())
    }

    pub fn set_color(&mut self, id: AnnotationId, color: Color) -> Result<(), OverlayError> {
        self.text_mut(id)?.color = color;
        Ok(())
    }

    pub fn set_background_patch(
        &mut self,
        id: AnnotationId,
        enabled: bool,
    ) -> Result<(), OverlayError> {
        self.text_mut(id)?.background_patch = enabled;
        Ok(())
    }

    pub fn resize_rectangle(
        &mut self,
        id: AnnotationId,
        size: PercentSize,
    ) -> Result<(), OverlayError> {
        match &mut self.find_mut(id)?.kind {
            AnnotationKind::Rectangle(rect) => {
                rect.size = size;
                Ok(())
            }
            AnnotationKind::Text(_) => Err(OverlayError::WrongKind(id, "rectangle")),
        }
    }

    /// Remove an annotation permanently.
    pub fn delete(&mut self, id: AnnotationId) -> Result<Annotation, OverlayError> {
        for annotations in self.pages.values_mut() {
            if let Some(index) = annotations.iter().position(|annotation| annotation.id == id) {
                let removed = annotations.remove(index);
                if self.drag.is_some_and(|drag| drag.id == id) {
                    self.drag = None;
                }
                if self.selected == Some(id) {
                    self.selected = None;
                }
                self.pages.retain(|_, annotations| !annotations.is_empty());
                tracing::debug!(%id, "annotation deleted");
                return Ok(removed);
            }
        }
        Err(OverlayError::UnknownAnnotation(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::PercentRect;

    fn container() -> ContainerRect {
        ContainerRect::new(0.0, 0.0, 600.0, 800.0)
    }

    fn down(target: PointerTarget, x: f32, y: f32) -> PointerEvent {
        PointerEvent::Down { target, pointer: PixelPoint::new(x, y) }
    }

    fn moved(x: f32, y: f32) -> PointerEvent {
        PointerEvent::Move { pointer: PixelPoint::new(x, y) }
    }

    fn send(session: &mut OverlaySession, event: PointerEvent) -> OverlayOutcome {
        session.handle_pointer(1, event, container(), &[])
    }

    fn probe(text: &str) -> TextProbeItem {
        TextProbeItem {
            text: text.to_owned(),
            bounds: PercentRect::new(PercentPoint::new(10.0, 20.0), PercentSize::new(15.0, 2.0)),
            font_size_pt: 11.0,
        }
    }

    #[test]
    fn add_text_click_creates_one_annotation_and_returns_to_view() {
        let mut session = OverlaySession::default();
        session.set_mode(InteractionMode::AddText);

        let outcome = send(&mut session, down(PointerTarget::Container, 300.0, 400.0));

        let OverlayOutcome::Created(id) = outcome else {
            panic!("expected creation, got {outcome:?}");
        };
        assert_eq!(session.mode(), InteractionMode::View);
        assert_eq!(session.annotations_for(1).len(), 1);

        let annotation = session.get(id).expect("annotation exists");
        assert_eq!(annotation.position, PercentPoint::new(50.0, 50.0));
        assert!(annotation.is_text());
    }

    #[test]
    fn add_rectangle_uses_default_size() {
        let mut session = OverlaySession::default();
        session.set_mode(InteractionMode::AddRectangle);

        session.handle_pointer(2, down(PointerTarget::Container, 0.0, 0.0), container(), &[]);

        let rect = session.annotations_for(2)[0].as_rectangle().copied().expect("rectangle");
        assert_eq!(rect.size, PercentSize::new(10.0, 5.0));
        assert_eq!(session.mode(), InteractionMode::View);
    }

    #[test]
    fn click_in_view_mode_creates_nothing() {
        let mut session = OverlaySession::default();
        let outcome = send(&mut session, down(PointerTarget::Container, 10.0, 10.0));

        assert_eq!(outcome, OverlayOutcome::Ignored);
        assert!(session.is_empty());
    }

    #[test]
    fn rewrite_mode_stays_active_across_clicks() {
        let mut session = OverlaySession::default();
        session.set_mode(InteractionMode::RewriteText);
        let probes = vec![probe("Hello"), probe("World")];

        for index in [0, 1] {
            let event = down(PointerTarget::TextItem(index), 70.0, 165.0);
            session.handle_pointer(1, event, container(), &probes);
        }

        assert_eq!(session.mode(), InteractionMode::RewriteText);
        let texts: Vec<_> = session
            .annotations_for(1)
            .iter()
            .filter_map(|annotation| annotation.as_text())
            .collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].content, "Hello");
        assert!(texts[0].background_patch);
        assert_eq!(texts[0].covers, Some(PercentSize::new(15.0, 2.0)));
        assert_eq!(texts[0].font_size_pt, 11.0);
    }

    #[test]
    fn rewrite_with_stale_probe_index_is_ignored() {
        let mut session = OverlaySession::default();
        session.set_mode(InteractionMode::RewriteText);

        let outcome = send(&mut session, down(PointerTarget::TextItem(3), 0.0, 0.0));
        assert_eq!(outcome, OverlayOutcome::Ignored);
    }

    #[test]
    fn drag_follows_pointer_and_keeps_grab_offset() {
        let mut session = OverlaySession::default();
        let id = session.place_text(1, PercentPoint::new(10.0, 10.0), "drag me");

        // Grab 5% right of the annotation's anchor.
        let outcome = send(&mut session, down(PointerTarget::Annotation(id), 90.0, 80.0));
        assert_eq!(outcome, OverlayOutcome::DragStarted(id));

        send(&mut session, moved(300.0, 400.0));
        let position = session.get(id).expect("exists").position;
        assert!((position.x - 45.0).abs() < 1e-3);
        assert!((position.y - 50.0).abs() < 1e-3);

        assert_eq!(send(&mut session, PointerEvent::Leave), OverlayOutcome::DragEnded(id));
        assert_eq!(session.dragging(), None);

        let after = send(&mut session, moved(0.0, 0.0));
        assert_eq!(after, OverlayOutcome::Ignored);
    }

    #[test]
    fn drag_clamps_to_percentage_bounds() {
        let mut session = OverlaySession::default();
        let id =
            session.place_rectangle(1, PercentPoint::new(50.0, 50.0), PercentSize::new(5.0, 5.0));

        send(&mut session, down(PointerTarget::Annotation(id), 300.0, 400.0));
        send(&mut session, moved(-900.0, 5000.0));

        let position = session.get(id).expect("exists").position;
        assert_eq!(position, PercentPoint::new(0.0, 100.0));
    }

    #[test]
    fn second_drag_is_ignored_while_first_is_active() {
        let mut session = OverlaySession::default();
        let first = session.place_text(1, PercentPoint::new(10.0, 10.0), "a");
        let second = session.place_text(1, PercentPoint::new(60.0, 60.0), "b");

        send(&mut session, down(PointerTarget::Annotation(first), 60.0, 80.0));
        let outcome = send(&mut session, down(PointerTarget::Annotation(second), 360.0, 480.0));

        assert_eq!(outcome, OverlayOutcome::Ignored);
        assert_eq!(session.dragging(), Some(first));
    }

    #[test]
    fn deleted_ids_are_never_reused() {
        let mut session = OverlaySession::default();
        let first = session.place_text(1, PercentPoint::new(1.0, 1.0), "a");
        session.delete(first).expect("delete");

        let second = session.place_text(1, PercentPoint::new(1.0, 1.0), "b");
        assert_ne!(first, second);
        assert!(session.get(first).is_none());
        assert_eq!(session.delete(first), Err(OverlayError::UnknownAnnotation(first)));

        session.reset();
        let third = session.place_text(1, PercentPoint::new(1.0, 1.0), "c");
        assert!(third > second);
    }

    #[test]
    fn annotations_survive_page_navigation() {
        let mut session = OverlaySession::default();
        session.place_text(1, PercentPoint::new(5.0, 5.0), "page one");
        session.place_text(3, PercentPoint::new(5.0, 5.0), "page three");

        assert_eq!(session.annotations_for(1).len(), 1);
        assert_eq!(session.annotations_for(2).len(), 0);
        assert_eq!(session.annotations_for(3).len(), 1);

        let pages: Vec<u32> = session.pages_with_annotations().map(|(page, _)| page).collect();
        assert_eq!(pages, vec![1, 3]);
    }

    #[test]
    fn deleting_dragged_annotation_ends_drag() {
        let mut session = OverlaySession::default();
        let id = session.place_text(1, PercentPoint::new(10.0, 10.0), "x");
        send(&mut session, down(PointerTarget::Annotation(id), 60.0, 80.0));

        session.delete(id).expect("delete");
        assert_eq!(session.dragging(), None);
        assert_eq!(session.selected(), None);
    }

    #[test]
    fn edits_validate_kind_and_clamp_font_size() {
        let mut session = OverlaySession::default();
        let text = session.place_text(1, PercentPoint::new(0.0, 0.0), "a");
        let rect =
            session.place_rectangle(1, PercentPoint::new(0.0, 0.0), PercentSize::new(1.0, 1.0));

        session.set_font_size(text, 1000.0).expect("text edit");
        let size = session.get(text).and_then(Annotation::as_text).map(|t| t.font_size_pt);
        assert_eq!(size, Some(MAX_FONT_SIZE_PT));

        assert_eq!(session.set_text(rect, "nope"), Err(OverlayError::WrongKind(rect, "text")));
        assert_eq!(
            session.resize_rectangle(text, PercentSize::new(1.0, 1.0)),
            Err(OverlayError::WrongKind(text, "rectangle"))
        );
    }
}
