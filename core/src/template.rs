//! Template algebra (C1): an immutable `(literals, values)` pair honouring
//! `|literals| = |values| + 1`. Builders operate on a mutable draft and
//! `seal` it into a [`Template`]; direct construction with mismatched
//! lengths is a programmer error caught by `seal`'s assertion.

use crate::value::Value;

/// Finite, ordered template. Rendered form interleaves `literals[0]`,
/// encoded `values[0]`, `literals[1]`, ..., `values[n-1]`, `literals[n]`.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) literals: Vec<String>,
    pub(crate) values: Vec<Value>,
}

impl Template {
    /// Constructs a template directly, validating the invariant. Prefer
    /// [`TemplateBuilder`] for anything beyond a bare literal.
    pub fn new(literals: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            literals.len(),
            values.len() + 1,
            "template invariant violated: |literals|={} must equal |values|+1={}",
            literals.len(),
            values.len() + 1
        );
        Self { literals, values }
    }

    /// A template holding only a raw literal, with no values.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            literals: vec![sql.into()],
            values: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::raw("")
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.literals.iter().all(|l| l.is_empty())
    }

    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns a fresh builder seeded with this template's content, so a
    /// sealed template can be extended further (e.g. appending a generated
    /// SET clause onto a caller-supplied WHERE fragment).
    pub fn into_builder(self) -> TemplateBuilder {
        TemplateBuilder {
            literals: self.literals,
            values: self.values,
        }
    }

    /// Concatenates `self` and `other` with a literal joiner in between,
    /// e.g. `a.join(" AND ", b)`.
    pub fn join(self, joiner: impl Into<String>, other: Template) -> Template {
        let mut builder = self.into_builder();
        builder.append_literal(&joiner.into());
        builder.splice_fragment(other);
        builder.seal()
    }
}

/// Mutable draft buffer for composing a [`Template`].
///
/// Invariant is maintained as an operating discipline across the exposed
/// operations (`append_literal`, `push_value`/`push_literal`,
/// `splice_fragment`) and asserted once more at `seal`.
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    literals: Vec<String>,
    values: Vec<Value>,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self {
            literals: vec![String::new()],
            values: Vec::new(),
        }
    }

    /// Appends raw text to the trailing (currently-open) literal slot.
    pub fn append_literal(&mut self, s: &str) -> &mut Self {
        self.literals
            .last_mut()
            .expect("template builder always has a trailing literal")
            .push_str(s);
        self
    }

    /// Pushes a value then opens a fresh literal slot after it, extending
    /// the draft by one value/literal pair and preserving the invariant.
    pub fn push_value(&mut self, v: Value) -> &mut Self {
        self.values.push(v);
        self.literals.push(String::new());
        self
    }

    /// Convenience alias matching the two-step form from §4.1: push a
    /// value, then append trailing literal text onto the newly-opened slot.
    pub fn push_literal(&mut self, s: &str) -> &mut Self {
        self.append_literal(s)
    }

    /// Merges a sub-template: the draft's trailing literal gets
    /// `frag.literals[0]` appended; the remainder of `frag.literals` are
    /// pushed as fresh slots interleaved with `frag.values`.
    pub fn splice_fragment(&mut self, frag: Template) -> &mut Self {
        let Template {
            mut literals,
            values,
        } = frag;
        if literals.is_empty() {
            return self;
        }
        let first = literals.remove(0);
        self.append_literal(&first);
        for (value, literal) in values.into_iter().zip(literals.into_iter()) {
            self.push_value(value);
            self.append_literal(&literal);
        }
        self
    }

    pub fn seal(self) -> Template {
        assert_eq!(
            self.literals.len(),
            self.values.len() + 1,
            "template builder invariant violated on seal"
        );
        Template {
            literals: self.literals,
            values: self.values,
        }
    }
}

impl From<Template> for TemplateBuilder {
    fn from(t: Template) -> Self {
        t.into_builder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DbValue;

    #[test]
    fn invariant_holds_through_composition() {
        let mut b = TemplateBuilder::new();
        b.append_literal("SELECT * FROM t WHERE a = ")
            .push_value(Value::Literal(DbValue::Int(1)))
            .append_literal(" AND b = ")
            .push_value(Value::Identifier("col".into()))
            .append_literal("");
        let t = b.seal();
        assert_eq!(t.literals.len(), t.values.len() + 1);
    }

    #[test]
    fn splice_preserves_invariant_for_nested_fragments() {
        let inner = {
            let mut b = TemplateBuilder::new();
            b.append_literal("x = ")
                .push_value(Value::Literal(DbValue::Int(1)))
                .append_literal(" AND y = ")
                .push_value(Value::Literal(DbValue::Int(2)));
            b.seal()
        };

        let mut outer = TemplateBuilder::new();
        outer.append_literal("SELECT * FROM t WHERE ");
        outer.splice_fragment(inner);
        outer.append_literal(" ORDER BY x");
        let sealed = outer.seal();

        assert_eq!(sealed.literals.len(), sealed.values.len() + 1);
        assert_eq!(sealed.values.len(), 2);
        assert_eq!(sealed.literals[0], "SELECT * FROM t WHERE x = ");
        assert_eq!(sealed.literals[1], " AND y = ");
        assert_eq!(sealed.literals[2], " ORDER BY x");
    }

    #[test]
    #[should_panic(expected = "invariant")]
    fn mismatched_construction_panics() {
        let _ = Template::new(vec!["a".into()], vec![Value::int(1), Value::int(2)]);
    }
}
