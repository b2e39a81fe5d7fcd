//! Validating the assembled object graph against the document schema,
//! rooted at the catalog.

use crate::config::ValidationMode;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::object::{keys, Object, ObjectId};
use log::warn;

/// Check the object graph under the context's validation mode.
///
/// Strict mode returns the first uncorrectable error. Relaxed mode repairs
/// what it can in memory, collects the remaining findings and returns them.
/// With validation off, no checks run at all.
pub fn validate(ctx: &mut Context) -> Result<Vec<Error>> {
    if ctx.config().validation_mode == ValidationMode::None {
        return Ok(vec![]);
    }

    let mut v = Validator {
        strict: ctx.config().validation_mode == ValidationMode::Strict,
        errors: vec![],
    };

    v.document(ctx)?;

    Ok(v.errors)
}

struct Validator {
    strict: bool,
    errors: Vec<Error>,
}

impl Validator {
    /// Record a violation: fatal in strict mode, collected in relaxed mode.
    fn flag(&mut self, message: String) -> Result<()> {
        if self.strict {
            return Err(Error::Validation(message));
        }

        warn!("{message}");
        self.errors.push(Error::Validation(message));

        Ok(())
    }

    fn document(&mut self, ctx: &mut Context) -> Result<()> {
        let size = ctx.xref.trailer.get_uint(keys::SIZE);
        match size {
            Some(size) if size < ctx.xref.size() => {
                self.flag(format!(
                    "trailer /Size {size} is smaller than the reconstructed {}",
                    ctx.xref.size()
                ))?;

                let fixed = ctx.xref.size();
                ctx.xref.trailer.set(keys::SIZE, Object::Integer(fixed as i64));
            }
            None => {
                self.flag("trailer has no /Size entry".into())?;
            }
            _ => {}
        }

        let root = ctx.root_id()?;
        self.catalog(ctx, root)?;

        Ok(())
    }

    fn catalog(&mut self, ctx: &mut Context, root: ObjectId) -> Result<()> {
        let catalog = ctx.dereference(root)?.clone();

        let Some(dict) = catalog.as_dict() else {
            return Err(Error::Validation(format!(
                "catalog {root} is not a dictionary"
            )));
        };

        if !dict.is_type(keys::CATALOG) {
            self.flag(format!("catalog {root} lacks /Type /Catalog"))?;

            // Common enough that the repair is safe.
            if let Some(repaired) = ctx.dereference(root)?.clone().as_dict().cloned().map(|mut d| {
                d.set(keys::TYPE, Object::name(keys::CATALOG));
                d
            }) {
                ctx.set_object(root, Object::Dict(repaired));
            }
        }

        let Some(pages_ref) = dict.get_ref(keys::PAGES) else {
            return Err(Error::Validation(
                "catalog has no /Pages reference".into(),
            ));
        };

        let mut visited = vec![];
        let count = self.pages_node(ctx, pages_ref, None, &mut visited)?;

        if count == 0 {
            self.flag("document has no pages".into())?;
        }

        Ok(())
    }

    /// Validate a page tree node, returning the number of leaf pages below
    /// it.
    fn pages_node(
        &mut self,
        ctx: &mut Context,
        id: ObjectId,
        parent: Option<ObjectId>,
        visited: &mut Vec<ObjectId>,
    ) -> Result<u64> {
        if visited.contains(&id) {
            self.flag(format!("page tree cycle through {id}"))?;

            return Ok(0);
        }
        visited.push(id);

        let node = ctx.dereference(id)?.clone();
        let Some(dict) = node.as_dict() else {
            self.flag(format!("page tree node {id} is not a dictionary"))?;

            return Ok(0);
        };

        let is_page = dict.is_type(keys::PAGE);
        let is_pages = dict.is_type(keys::PAGES) || dict.contains_key(keys::KIDS);

        if is_page {
            self.page(ctx, id, dict.clone())?;

            return Ok(1);
        }

        if !is_pages {
            self.flag(format!("page tree node {id} is neither /Pages nor /Page"))?;

            return Ok(0);
        }

        if parent.is_some() && dict.get_ref(keys::PARENT).is_none() {
            self.flag(format!("page tree node {id} has no /Parent entry"))?;
        }

        let kids: Vec<ObjectId> = match dict.get(keys::KIDS) {
            Some(Object::Array(kid_objects)) => {
                let mut kids = Vec::with_capacity(kid_objects.len());

                for kid in kid_objects {
                    match kid {
                        Object::Reference(kid_id) => kids.push(*kid_id),
                        // Direct page dicts in /Kids are not conforming.
                        other => self.flag(format!(
                            "kid of {id} is a direct {other:?}, not a reference"
                        ))?,
                    }
                }

                kids
            }
            Some(_) => {
                self.flag(format!("/Kids of {id} is not an array"))?;

                vec![]
            }
            None => {
                self.flag(format!("page tree node {id} has no /Kids entry"))?;

                vec![]
            }
        };

        let mut count = 0u64;
        for kid in kids {
            count += self.pages_node(ctx, kid, Some(id), visited)?;
        }

        match dict.get_int(keys::COUNT) {
            Some(recorded) if recorded as u64 == count => {}
            Some(recorded) => {
                self.flag(format!(
                    "page tree node {id} records /Count {recorded}, found {count}"
                ))?;

                self.repair_count(ctx, id, count);
            }
            None => {
                self.flag(format!("page tree node {id} has no /Count entry"))?;

                self.repair_count(ctx, id, count);
            }
        }

        Ok(count)
    }

    fn repair_count(&self, ctx: &mut Context, id: ObjectId, count: u64) {
        if self.strict {
            return;
        }

        if let Ok(node) = ctx.dereference(id) {
            if let Some(mut dict) = node.as_dict().cloned() {
                dict.set(keys::COUNT, Object::Integer(count as i64));
                ctx.set_object(id, Object::Dict(dict));
            }
        }
    }

    fn page(
        &mut self,
        ctx: &mut Context,
        id: ObjectId,
        dict: crate::object::Dict,
    ) -> Result<()> {
        if dict.get_ref(keys::PARENT).is_none() {
            self.flag(format!("page {id} has no /Parent entry"))?;
        }

        // /MediaBox may be inherited from any ancestor.
        let mut media_box = dict.get(keys::MEDIA_BOX).cloned();
        let mut cursor = dict.get_ref(keys::PARENT);
        let mut hops = 0;

        while media_box.is_none() {
            let Some(parent) = cursor else { break };

            // Degenerate parent chains terminate the lookup.
            hops += 1;
            if hops > 64 {
                break;
            }

            let node = ctx.dereference(parent)?.clone();
            let Some(node) = node.as_dict() else { break };

            media_box = node.get(keys::MEDIA_BOX).cloned();
            cursor = node.get_ref(keys::PARENT);
        }

        match media_box {
            Some(Object::Array(coords)) if coords.len() == 4 => {
                if coords.iter().any(|c| c.as_f64().is_none()) {
                    self.flag(format!("/MediaBox of page {id} holds non-numbers"))?;
                }
            }
            Some(_) => {
                self.flag(format!("/MediaBox of page {id} is not a 4-element array"))?;
            }
            None => {
                self.flag(format!("page {id} has no /MediaBox, inherited or not"))?;
            }
        }

        if let Some(contents) = dict.get(b"Contents") {
            let valid = match contents {
                Object::Reference(r) => {
                    let target = ctx.dereference(*r)?;
                    target.as_stream().is_some() || target.is_null()
                }
                Object::Array(items) => items.iter().all(|i| i.as_reference().is_some()),
                _ => false,
            };

            if !valid {
                self.flag(format!("/Contents of page {id} is malformed"))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn build_pdf(objects: &[(u32, &str)], trailer_extra: &str) -> Vec<u8> {
        let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
        let mut offsets = vec![];

        for (num, body) in objects {
            offsets.push((*num, out.len()));
            out.extend_from_slice(format!("{num} 0 obj\n{body}\nendobj\n").as_bytes());
        }

        let max = objects.iter().map(|(n, _)| *n).max().unwrap_or(0);
        let xref = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", max + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for num in 1..=max {
            match offsets.iter().find(|(n, _)| *n == num) {
                Some((_, offset)) => {
                    out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes())
                }
                None => out.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R {trailer_extra} >>\nstartxref\n{xref}\n%%EOF\n",
                max + 1
            )
            .as_bytes(),
        );

        out
    }

    fn well_formed() -> Vec<u8> {
        build_pdf(
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
                (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>"),
            ],
            "",
        )
    }

    #[test]
    fn valid_document_passes_strict() {
        let mut config = Configuration::default();
        config.validation_mode = ValidationMode::Strict;

        let mut ctx = Context::read(well_formed(), config).unwrap();
        assert!(validate(&mut ctx).unwrap().is_empty());
    }

    #[test]
    fn wrong_count_fails_strict_but_is_repaired_relaxed() {
        let data = build_pdf(
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 7 >>"),
                (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>"),
            ],
            "",
        );

        let mut config = Configuration::default();
        config.validation_mode = ValidationMode::Strict;
        let mut ctx = Context::read(data.clone(), config).unwrap();
        assert!(matches!(validate(&mut ctx), Err(Error::Validation(_))));

        let mut ctx = Context::read(data, Configuration::default()).unwrap();
        let findings = validate(&mut ctx).unwrap();
        assert_eq!(findings.len(), 1);

        // The in-memory graph now carries the corrected count.
        let pages = ctx
            .dereference(ObjectId::new(2, 0))
            .unwrap()
            .as_dict()
            .unwrap()
            .clone();
        assert_eq!(pages.get_int(keys::COUNT), Some(1));
    }

    #[test]
    fn missing_media_box_is_flagged() {
        let data = build_pdf(
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
                (3, "<< /Type /Page /Parent 2 0 R >>"),
            ],
            "",
        );

        let mut ctx = Context::read(data, Configuration::default()).unwrap();
        let findings = validate(&mut ctx).unwrap();
        assert!(findings
            .iter()
            .any(|e| e.to_string().contains("MediaBox")));
    }

    #[test]
    fn inherited_media_box_is_accepted() {
        let data = build_pdf(
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (
                    2,
                    "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>",
                ),
                (3, "<< /Type /Page /Parent 2 0 R >>"),
            ],
            "",
        );

        let mut config = Configuration::default();
        config.validation_mode = ValidationMode::Strict;
        let mut ctx = Context::read(data, config).unwrap();
        assert!(validate(&mut ctx).unwrap().is_empty());
    }

    #[test]
    fn validation_none_skips_everything() {
        let data = build_pdf(&[(1, "<< /Pages 2 0 R >>")], "");

        let mut config = Configuration::default();
        config.validation_mode = ValidationMode::None;
        let mut ctx = Context::read(data, config).unwrap();
        assert!(validate(&mut ctx).unwrap().is_empty());
    }

    #[test]
    fn page_tree_cycle_is_flagged() {
        let data = build_pdf(
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [2 0 R] /Count 1 >>"),
            ],
            "",
        );

        let mut ctx = Context::read(data, Configuration::default()).unwrap();
        let findings = validate(&mut ctx).unwrap();
        assert!(findings.iter().any(|e| e.to_string().contains("cycle")));
    }
}
