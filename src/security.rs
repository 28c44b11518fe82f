//! Static pre-execution check for submitted Python.
//!
//! Parses the source and walks the syntax tree for imports of denied modules and
//! calls to denied builtins. Structural only: obfuscated access such as
//! `getattr(__import__('o' + 's'), 'system')` is out of reach and is left to the
//! sandbox's isolation.

use rustpython_parser::{ast, Parse};

use crate::config::SecuritySettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Analysis {
    pub safe: bool,
    pub error: Option<String>,
}

impl Analysis {
    fn safe() -> Self {
        Self { safe: true, error: None }
    }

    fn unsafe_with(error: String) -> Self {
        Self { safe: false, error: Some(error) }
    }
}

#[derive(Clone, Debug)]
pub struct SecurityAnalyzer {
    blocked_modules: Vec<String>,
    blocked_builtins: Vec<String>,
}

impl SecurityAnalyzer {
    pub fn new(settings: &SecuritySettings) -> Self {
        Self {
            blocked_modules: settings.blocked_modules.clone(),
            blocked_builtins: settings.blocked_builtins.clone(),
        }
    }

    /// Report every violation found, joined with `"; "`, in source order.
    pub fn analyze(&self, code: &str) -> Analysis {
        let suite = match ast::Suite::parse(code, "<submission>") {
            Ok(suite) => suite,
            Err(e) => return Analysis::unsafe_with(format!("Syntax Error: {e}")),
        };

        let mut walker = Walker { analyzer: self, violations: Vec::new() };
        walker.stmts(&suite);

        if walker.violations.is_empty() {
            Analysis::safe()
        } else {
            Analysis::unsafe_with(walker.violations.join("; "))
        }
    }

    fn module_blocked(&self, dotted: &str) -> bool {
        let root = dotted.split('.').next().unwrap_or(dotted);
        self.blocked_modules.iter().any(|m| m == root)
    }

    fn builtin_blocked(&self, name: &str) -> bool {
        self.blocked_builtins.iter().any(|b| b == name)
    }
}

struct Walker<'a> {
    analyzer: &'a SecurityAnalyzer,
    violations: Vec<String>,
}

impl Walker<'_> {
    fn stmts(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn exprs(&mut self, exprs: &[ast::Expr]) {
        for e in exprs {
            self.expr(e);
        }
    }

    fn opt_expr(&mut self, e: &Option<Box<ast::Expr>>) {
        if let Some(e) = e {
            self.expr(e);
        }
    }

    fn import(&mut self, module: &str) {
        if self.analyzer.module_blocked(module) {
            self.violations.push(format!("Import of blocked module '{module}'"));
        }
    }

    #[allow(irrefutable_let_patterns)]
    fn stmt(&mut self, stmt: &ast::Stmt) {
        use ast::Stmt;
        match stmt {
            Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    self.import(alias.name.as_str());
                }
            }
            Stmt::ImportFrom(ast::StmtImportFrom { module: Some(module), .. }) => {
                self.import(module.as_str());
            }
            Stmt::FunctionDef(ast::StmtFunctionDef { args, body, decorator_list, returns, .. })
            | Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { args, body, decorator_list, returns, .. }) => {
                self.exprs(decorator_list);
                self.arguments(args);
                self.opt_expr(returns);
                self.stmts(body);
            }
            Stmt::ClassDef(ast::StmtClassDef { bases, keywords, body, decorator_list, .. }) => {
                self.exprs(decorator_list);
                self.exprs(bases);
                for kw in keywords {
                    self.expr(&kw.value);
                }
                self.stmts(body);
            }
            Stmt::Return(ast::StmtReturn { value, .. }) => self.opt_expr(value),
            Stmt::Delete(ast::StmtDelete { targets, .. }) => self.exprs(targets),
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.exprs(targets);
                self.expr(value);
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::AnnAssign(ast::StmtAnnAssign { target, annotation, value, .. }) => {
                self.expr(target);
                self.expr(annotation);
                self.opt_expr(value);
            }
            Stmt::For(ast::StmtFor { target, iter, body, orelse, .. })
            | Stmt::AsyncFor(ast::StmtAsyncFor { target, iter, body, orelse, .. }) => {
                self.expr(target);
                self.expr(iter);
                self.stmts(body);
                self.stmts(orelse);
            }
            Stmt::While(ast::StmtWhile { test, body, orelse, .. })
            | Stmt::If(ast::StmtIf { test, body, orelse, .. }) => {
                self.expr(test);
                self.stmts(body);
                self.stmts(orelse);
            }
            Stmt::With(ast::StmtWith { items, body, .. })
            | Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                for item in items {
                    self.expr(&item.context_expr);
                    self.opt_expr(&item.optional_vars);
                }
                self.stmts(body);
            }
            Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.expr(subject);
                for case in cases {
                    self.opt_expr(&case.guard);
                    self.stmts(&case.body);
                }
            }
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.opt_expr(exc);
                self.opt_expr(cause);
            }
            Stmt::Try(ast::StmtTry { body, handlers, orelse, finalbody, .. })
            | Stmt::TryStar(ast::StmtTryStar { body, handlers, orelse, finalbody, .. }) => {
                self.stmts(body);
                for handler in handlers {
                    if let ast::ExceptHandler::ExceptHandler(h) = handler {
                        self.opt_expr(&h.type_);
                        self.stmts(&h.body);
                    }
                }
                self.stmts(orelse);
                self.stmts(finalbody);
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.expr(test);
                self.opt_expr(msg);
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => self.expr(value),
            _ => {}
        }
    }

    /// Annotations and defaults are evaluated when the `def` or `lambda` runs.
    fn arguments(&mut self, args: &ast::Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args) {
            self.opt_expr(&arg.def.annotation);
            self.opt_expr(&arg.default);
        }
        if let Some(vararg) = &args.vararg {
            self.opt_expr(&vararg.annotation);
        }
        for arg in &args.kwonlyargs {
            self.opt_expr(&arg.def.annotation);
            self.opt_expr(&arg.default);
        }
        if let Some(kwarg) = &args.kwarg {
            self.opt_expr(&kwarg.annotation);
        }
    }

    fn comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for g in generators {
            self.expr(&g.target);
            self.expr(&g.iter);
            self.exprs(&g.ifs);
        }
    }

    fn expr(&mut self, expr: &ast::Expr) {
        use ast::Expr;
        match expr {
            Expr::Call(ast::ExprCall { func, args, keywords, .. }) => {
                if let Expr::Name(ast::ExprName { id, .. }) = func.as_ref() {
                    if self.analyzer.builtin_blocked(id.as_str()) {
                        self.violations.push(format!("Call to blocked builtin '{}'", id.as_str()));
                    }
                }
                self.expr(func);
                self.exprs(args);
                for kw in keywords {
                    self.expr(&kw.value);
                }
            }
            Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.exprs(values),
            Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.expr(target);
                self.expr(value);
            }
            Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.expr(left);
                self.expr(right);
            }
            Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.expr(operand),
            Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.arguments(args);
                self.expr(body);
            }
            Expr::IfExp(ast::ExprIfExp { test, body, orelse, .. }) => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                for key in keys.iter().flatten() {
                    self.expr(key);
                }
                self.exprs(values);
            }
            Expr::Set(ast::ExprSet { elts, .. })
            | Expr::List(ast::ExprList { elts, .. })
            | Expr::Tuple(ast::ExprTuple { elts, .. }) => self.exprs(elts),
            Expr::ListComp(ast::ExprListComp { elt, generators, .. })
            | Expr::SetComp(ast::ExprSetComp { elt, generators, .. })
            | Expr::GeneratorExp(ast::ExprGeneratorExp { elt, generators, .. }) => {
                self.expr(elt);
                self.comprehensions(generators);
            }
            Expr::DictComp(ast::ExprDictComp { key, value, generators, .. }) => {
                self.expr(key);
                self.expr(value);
                self.comprehensions(generators);
            }
            Expr::Await(ast::ExprAwait { value, .. })
            | Expr::YieldFrom(ast::ExprYieldFrom { value, .. })
            | Expr::FormattedValue(ast::ExprFormattedValue { value, .. })
            | Expr::Attribute(ast::ExprAttribute { value, .. })
            | Expr::Starred(ast::ExprStarred { value, .. }) => self.expr(value),
            Expr::Yield(ast::ExprYield { value, .. }) => self.opt_expr(value),
            Expr::Compare(ast::ExprCompare { left, comparators, .. }) => {
                self.expr(left);
                self.exprs(comparators);
            }
            Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.exprs(values),
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.expr(value);
                self.expr(slice);
            }
            Expr::Slice(ast::ExprSlice { lower, upper, step, .. }) => {
                self.opt_expr(lower);
                self.opt_expr(upper);
                self.opt_expr(step);
            }
            _ => {}
        }
    }
}
