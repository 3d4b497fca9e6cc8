//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The resource-template expression grammar.
//!
//! Allocation templates embed arithmetic over the job shape, e.g.
//! `{samples}*120+3600` or `log({input_size})*1000000`. The grammar is
//! deliberately minimal: numbers, the three shape variables, `+ - * /`,
//! `log(...)` and parentheses. Anything else fails to parse, which rejects a
//! broken template when it is loaded into the allocation table instead of
//! when a job is submitted with it.

use std::str::FromStr;

use parse_display::Display;
use pom::parser::*;

use crate::error::Error;
use crate::error::Result;
use crate::job::Shape;

/// The three shape variables a template may reference
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(style = "snake_case")]
pub enum Variable {
    Samples,
    Columns,
    InputSize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(Variable),
    Log(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr> {
        (space() * expr() - space() - end())
            .parse(input.as_bytes())
            .map_err(|e| Error::Resource(format!("Invalid allocation expression '{input}': {e}")))
    }

    /// Evaluate against a job shape. `log` is the natural logarithm.
    pub fn eval(&self, shape: &Shape) -> Result<f64> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Var(v) => shape.get(*v).ok_or_else(|| {
                Error::Resource(format!("Shape variable '{{{v}}}' is not available"))
            }),
            Expr::Log(e) => Ok(e.eval(shape)?.ln()),
            Expr::Add(a, b) => Ok(a.eval(shape)? + b.eval(shape)?),
            Expr::Sub(a, b) => Ok(a.eval(shape)? - b.eval(shape)?),
            Expr::Mul(a, b) => Ok(a.eval(shape)? * b.eval(shape)?),
            Expr::Div(a, b) => Ok(a.eval(shape)? / b.eval(shape)?),
        }
    }
}

fn space<'a>() -> Parser<'a, u8, ()> {
    one_of(b" \t").repeat(0..).discard()
}

fn number<'a>() -> Parser<'a, u8, f64> {
    let integer = one_of(b"0123456789").repeat(1..);
    let frac = sym(b'.') + one_of(b"0123456789").repeat(1..);
    (integer + frac.opt())
        .collect()
        .convert(std::str::from_utf8)
        .convert(f64::from_str)
}

fn variable<'a>() -> Parser<'a, u8, Variable> {
    let name = seq(b"samples").map(|_| Variable::Samples)
        | seq(b"columns").map(|_| Variable::Columns)
        | seq(b"input_size").map(|_| Variable::InputSize);
    sym(b'{') * name - sym(b'}')
}

fn factor<'a>() -> Parser<'a, u8, Expr> {
    let log = (seq(b"log") * space() * sym(b'(') * call(expr) - sym(b')'))
        .map(|e| Expr::Log(Box::new(e)));
    let paren = sym(b'(') * call(expr) - sym(b')');
    space() * (log | variable().map(Expr::Var) | number().map(Expr::Num) | paren) - space()
}

fn term<'a>() -> Parser<'a, u8, Expr> {
    (factor() + (one_of(b"*/") + factor()).repeat(0..)).map(|(first, rest)| {
        rest.into_iter().fold(first, |acc, (op, rhs)| match op {
            b'*' => Expr::Mul(Box::new(acc), Box::new(rhs)),
            _ => Expr::Div(Box::new(acc), Box::new(rhs)),
        })
    })
}

fn expr<'a>() -> Parser<'a, u8, Expr> {
    (term() + (one_of(b"+-") + term()).repeat(0..)).map(|(first, rest)| {
        rest.into_iter().fold(first, |acc, (op, rhs)| match op {
            b'+' => Expr::Add(Box::new(acc), Box::new(rhs)),
            _ => Expr::Sub(Box::new(acc), Box::new(rhs)),
        })
    })
}
