//! Walks a finalised [`Template`] into a dialect-specific SQL string plus a
//! positionally-ordered parameter array (§4.2).
//!
//! Invariant: placeholder indices are allocated strictly in the
//! left-to-right order encountered after full sub-fragment expansion
//! (testable property #2). This is enforced structurally here: `render`
//! recurses depth-first through `SubFragment`/`Expression` values using a
//! single shared counter and a single shared output buffer, so there is no
//! path by which a later literal value could be numbered before an earlier
//! one.

use crate::dialect::Dialect;
use crate::template::Template;
use crate::value::{DbValue, Value};

/// The rendered, driver-ready form of a template.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<DbValue>,
}

pub fn render(template: &Template, dialect: &dyn Dialect) -> Rendered {
    let mut sql = String::new();
    let mut params = Vec::new();
    let mut next_index = 1usize;
    render_into(template, dialect, &mut sql, &mut params, &mut next_index);
    Rendered { sql, params }
}

fn render_into(
    template: &Template,
    dialect: &dyn Dialect,
    sql: &mut String,
    params: &mut Vec<DbValue>,
    next_index: &mut usize,
) {
    for i in 0..template.values().len() {
        sql.push_str(&template.literals()[i]);
        match &template.values()[i] {
            Value::Literal(value) => {
                sql.push_str(&dialect.placeholder(*next_index));
                *next_index += 1;
                params.push(dialect.normalize_param(value.clone()));
            }
            Value::Identifier(name) => {
                sql.push_str(&dialect.quote_identifier(name));
            }
            Value::Builtin(builtin) => {
                sql.push_str(&dialect.resolve_builtin(*builtin));
            }
            Value::SubFragment(sub) | Value::Expression(sub) => {
                render_into(sub, dialect, sql, params, next_index);
            }
        }
    }
    sql.push_str(template.literals().last().expect("template has n+1 literals"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DeclaredType;
    use crate::dialect::DialectKind;
    use crate::template::TemplateBuilder;

    struct TestPostgres;
    impl Dialect for TestPostgres {
        fn kind(&self) -> DialectKind {
            DialectKind::Postgres
        }
        fn quote_identifier(&self, ident: &str) -> String {
            format!("\"{ident}\"")
        }
        fn placeholder(&self, index: usize) -> String {
            format!("${index}")
        }
        fn supports_returning(&self) -> bool {
            true
        }
        fn column_type_sql(&self, _ty: DeclaredType) -> &'static str {
            "text"
        }
        fn supports_online_foreign_key_add(&self) -> bool {
            true
        }
    }

    #[test]
    fn placeholder_ordering_survives_nested_fragments() {
        let inner = {
            let mut b = TemplateBuilder::new();
            b.append_literal("b = ").push_value(Value::int(2));
            b.seal()
        };
        let mut outer = TemplateBuilder::new();
        outer
            .append_literal("a = ")
            .push_value(Value::int(1))
            .append_literal(" AND ");
        outer.splice_fragment(inner);
        let tpl = outer.seal();

        let rendered = render(&tpl, &TestPostgres);
        assert_eq!(rendered.sql, "a = $1 AND b = $2");
        assert_eq!(rendered.params, vec![DbValue::Int(1), DbValue::Int(2)]);
    }

    #[test]
    fn identifiers_and_builtins_never_parameterised() {
        use crate::value::Builtin;
        let mut b = TemplateBuilder::new();
        b.append_literal("UPDATE t SET ")
            .push_value(Value::Identifier("updated_at".into()))
            .append_literal(" = ")
            .push_value(Value::Builtin(Builtin::CurrentTimestamp));
        let tpl = b.seal();
        let rendered = render(&tpl, &TestPostgres);
        assert!(rendered.params.is_empty());
        assert_eq!(rendered.sql, "UPDATE t SET \"updated_at\" = CURRENT_TIMESTAMP");
    }
}
