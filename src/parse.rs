//! Parser for the textual query language (grammar in `query.pest`).

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::datatype::Value;
use crate::error::{Result, SearchlinkError};
use crate::expr::{BinaryOp, Expr, Ordering, Query};

#[derive(Parser)]
#[grammar = "query.pest"]
struct QueryParser;

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_from
            | Rule::kw_in
            | Rule::kw_join
            | Rule::kw_on
            | Rule::kw_where
            | Rule::kw_select
            | Rule::kw_order
            | Rule::kw_by
            | Rule::kw_take
            | Rule::kw_and
            | Rule::kw_or
            | Rule::kw_not
    )
}

// children without the keyword tokens
fn inner(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn unexpected(pair: &Pair<'_, Rule>) -> SearchlinkError {
    let (line, col) = pair.as_span().start_pos().line_col();
    SearchlinkError::Parse {
        message: format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str()),
        line: Some(line),
        col: Some(col),
    }
}

fn missing(what: &str) -> SearchlinkError {
    SearchlinkError::Parse { message: format!("missing {what}"), line: None, col: None }
}

fn next_ident<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>, what: &str) -> Result<String> {
    pairs.next().map(|p| p.as_str().to_string()).ok_or_else(|| missing(what))
}

fn next_pair<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>, what: &str) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| missing(what))
}

/// Parses a query such as
/// `from c in Customers where search(c, "Lon*") select c.CustomerId`.
pub fn parse_query(text: &str) -> Result<Query> {
    let root = QueryParser::parse(Rule::query, text)?.next().ok_or_else(|| missing("query"))?;
    let mut query: Option<Query> = None;
    for clause in root.into_inner() {
        match clause.as_rule() {
            Rule::from_clause => {
                let mut parts = inner(clause);
                let item = next_ident(&mut parts, "item variable")?;
                let entity = next_ident(&mut parts, "entity")?;
                query = Some(Query::from(&item, &entity));
            }
            Rule::join_clause => {
                let q = query.take().ok_or_else(|| missing("from clause"))?;
                let mut parts = inner(clause);
                let item = next_ident(&mut parts, "join item variable")?;
                let entity = next_ident(&mut parts, "join entity")?;
                let left = build_operand(next_pair(&mut parts, "join operand")?)?;
                let right = build_operand(next_pair(&mut parts, "join operand")?)?;
                query = Some(q.join(&item, &entity, left, right));
            }
            Rule::where_clause => {
                let q = query.take().ok_or_else(|| missing("from clause"))?;
                let predicate = build_expr(next_pair(&mut inner(clause), "predicate")?)?;
                query = Some(q.filter(predicate));
            }
            Rule::select_clause => {
                let q = query.take().ok_or_else(|| missing("from clause"))?;
                let exprs = inner(clause).map(build_expr).collect::<Result<Vec<_>>>()?;
                query = Some(q.select(exprs));
            }
            Rule::order_clause => {
                let mut q = query.take().ok_or_else(|| missing("from clause"))?;
                for item in inner(clause) {
                    let mut parts = item.into_inner();
                    let expr = build_expr(next_pair(&mut parts, "order expression")?)?;
                    let descending = parts
                        .next()
                        .map(|d| d.as_str().eq_ignore_ascii_case("desc"))
                        .unwrap_or(false);
                    q.ordering.push(Ordering { expr, descending });
                }
                query = Some(q);
            }
            Rule::take_clause => {
                let q = query.take().ok_or_else(|| missing("from clause"))?;
                let n = next_pair(&mut inner(clause), "row count")?;
                let count = n.as_str().parse::<u64>().map_err(|_| unexpected(&n))?;
                query = Some(q.take(count));
            }
            Rule::EOI => (),
            _ => return Err(unexpected(&clause)),
        }
    }
    query.ok_or_else(|| missing("from clause"))
}

/// Parses a standalone filter expression, e.g. `search(c, "Lon*") and c.City = 'London'`.
pub fn parse_expr(text: &str) -> Result<Expr> {
    let query = parse_query(&format!("from __ in __ where {text}"))?;
    query.filters.into_iter().next().ok_or_else(|| missing("expression"))
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expr => build_expr(next_pair(&mut pair.into_inner(), "expression")?),
        Rule::or_expr => fold(pair, Expr::or),
        Rule::and_expr => fold(pair, Expr::and),
        Rule::unary => {
            let mut parts = pair.into_inner();
            let first = next_pair(&mut parts, "operand")?;
            if first.as_rule() == Rule::kw_not {
                Ok(build_expr(next_pair(&mut parts, "negated operand")?)?.not())
            } else {
                build_expr(first)
            }
        }
        Rule::comparison => {
            let mut parts = pair.into_inner();
            let left = build_operand(next_pair(&mut parts, "operand")?)?;
            match parts.next() {
                None => Ok(left),
                Some(op) => {
                    let op = comparison_operator(&op)?;
                    let right = build_operand(next_pair(&mut parts, "right operand")?)?;
                    Ok(left.binary(op, right))
                }
            }
        }
        Rule::operand => build_operand(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn fold(pair: Pair<'_, Rule>, combine: fn(Expr, Expr) -> Expr) -> Result<Expr> {
    let mut parts = inner(pair);
    let mut acc = build_expr(next_pair(&mut parts, "operand")?)?;
    for next in parts {
        acc = combine(acc, build_expr(next)?);
    }
    Ok(acc)
}

fn comparison_operator(pair: &Pair<'_, Rule>) -> Result<BinaryOp> {
    Ok(match pair.as_str().to_ascii_lowercase().as_str() {
        "=" => BinaryOp::Eq,
        "!=" | "<>" => BinaryOp::NotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::LtEq,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::GtEq,
        "like" => BinaryOp::Like,
        _ => return Err(unexpected(pair)),
    })
}

fn build_operand(pair: Pair<'_, Rule>) -> Result<Expr> {
    let pair = if pair.as_rule() == Rule::operand {
        next_pair(&mut pair.into_inner(), "operand")?
    } else {
        pair
    };
    match pair.as_rule() {
        Rule::call => {
            let mut parts = pair.into_inner();
            let function = next_ident(&mut parts, "function name")?;
            let args = parts.map(build_expr).collect::<Result<Vec<_>>>()?;
            Ok(Expr::Call { function: function.to_ascii_lowercase(), args })
        }
        Rule::member => {
            let mut parts = pair.into_inner();
            let item = next_ident(&mut parts, "item variable")?;
            let property = next_ident(&mut parts, "property")?;
            Ok(Expr::Member { item, property })
        }
        Rule::parameter => Ok(Expr::Parameter(next_ident(&mut pair.into_inner(), "parameter name")?)),
        Rule::literal => build_literal(next_pair(&mut pair.into_inner(), "literal")?),
        Rule::ident => Ok(Expr::Item(pair.as_str().to_string())),
        Rule::expr => build_expr(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn build_literal(pair: Pair<'_, Rule>) -> Result<Expr> {
    let value = match pair.as_rule() {
        Rule::null => Value::Null,
        Rule::integer => Value::Integer(pair.as_str().parse().map_err(|_| unexpected(&pair))?),
        Rule::real => Value::Real(pair.as_str().parse().map_err(|_| unexpected(&pair))?),
        Rule::string => {
            let raw = next_pair(&mut pair.into_inner(), "string body")?;
            match raw.as_rule() {
                Rule::dq_inner => Value::Text(raw.as_str().replace("\"\"", "\"")),
                _ => Value::Text(raw.as_str().replace("''", "'")),
            }
        }
        _ => return Err(unexpected(&pair)),
    };
    Ok(Expr::Literal(value))
}
