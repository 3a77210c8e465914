//! vitte-compiler — compilateur Vitte : un seul passage AST → bytecode.
//!
//! Pas de table de types, pas de passe de vérification séparée : chaque nœud
//! de l'AST est visité une fois et émet directement sur
//! [`vitte_core::bytecode::opcode::OpCode`], le catalogue partagé avec
//! `vitte-vm`. Les sauts en avant (`if`/`while`/`for`/`try`/court-circuit)
//! écrivent un opérande placeholder puis sont corrigés une fois la position
//! cible connue ("back-patching").
//!
//! Pipeline : [`Compiler::compile`] prend un [`vitte_ast::Program`] et rend
//! soit un [`Artifact`] (code + noms + table des lignes), soit une
//! [`CompileError`] listant les diagnostics bloquants.
//!
//! ```
//! use vitte_compiler::{Compiler, CompilerOptions};
//! use vitte_ast::Program;
//!
//! let program = Program { items: Vec::new() };
//! let mut compiler = Compiler::new(CompilerOptions::default());
//! let artifact = compiler.compile(&program).unwrap();
//! assert!(!artifact.code.is_empty()); // au moins le `Halt` final
//! ```

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
use std::{collections::BTreeMap, format, string::String, vec, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, format, string::String, vec, vec::Vec};

#[cfg(not(feature = "std"))]
extern crate alloc;

use vitte_ast as ast;
use vitte_core::bytecode::opcode::{encode, OpCode};
use vitte_core::bytecode::source_map::SourceMap;

#[cfg(feature = "vitbc-backend")]
use vitte_vitbc::Module;

/* ─────────────────────────── Options / diagnostics ─────────────────────────── */

/// Options de compilation.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Promeut les warnings en erreurs bloquantes.
    pub deny_warnings: bool,
    /// Version de conteneur VITBC à viser pour [`Artifact::into_module`].
    pub vitbc_version: u16,
    /// Compresse la section code à l'écriture (voir `vitte-vitbc`).
    pub compress_code: bool,
    /// Embarque les noms de diagnostic (fonctions, globales) dans l'artefact.
    pub embed_names: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { deny_warnings: false, vitbc_version: 2, compress_code: false, embed_names: true }
    }
}

/// Sévérité d'un diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Information neutre (ex : déclaration sans effet).
    Info,
    /// Avertissement non bloquant (sauf `deny_warnings`).
    Warning,
    /// Erreur bloquante.
    Error,
}

/// Un diagnostic attaché à une position source optionnelle.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Sévérité.
    pub severity: Severity,
    /// Message lisible.
    pub message: String,
    /// Position source, si connue.
    pub span: Option<ast::Span>,
}

impl Diagnostic {
    /// Construit un diagnostic d'erreur.
    pub fn error(message: impl Into<String>, span: Option<ast::Span>) -> Self {
        Self { severity: Severity::Error, message: message.into(), span }
    }

    /// Construit un diagnostic d'avertissement.
    pub fn warn(message: impl Into<String>, span: Option<ast::Span>) -> Self {
        Self { severity: Severity::Warning, message: message.into(), span }
    }
}

/// Erreur de compilation : tous les diagnostics accumulés avant l'abandon.
#[derive(Debug, Clone, Default)]
pub struct CompileError {
    /// Diagnostics émis (au moins un de sévérité `Error`).
    pub diagnostics: Vec<Diagnostic>,
}

/// Résultat de compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/* ─────────────────────────── Artefact de sortie ─────────────────────────── */

/// Sortie brute de l'émetteur : flux d'octets + métadonnées de debug.
///
/// Ne contient ni pool de constantes ni section de données : tous les
/// littéraux sont embarqués directement dans le flux `code` via les
/// instructions `Push*`.
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    /// Version ciblée pour le conteneur VITBC.
    pub version: u16,
    /// Flux d'instructions, encodage big-endian (voir `vitte_core::bytecode::opcode`).
    pub code: Vec<u8>,
    /// Noms rencontrés (fonctions, globales) utiles au désassembleur.
    pub names: Vec<String>,
    /// Table bytecode-index → ligne source.
    pub source_map: SourceMap,
}

#[cfg(feature = "vitbc-backend")]
impl Artifact {
    /// Convertit vers le conteneur `vitte_vitbc::Module`. `ints`/`floats`/
    /// `strings`/`data` restent vides : le catalogue d'opcodes inline tous
    /// les littéraux, il n'y a pas de pool de constantes séparé.
    pub fn into_module(self) -> Module {
        Module {
            version: self.version,
            ints: Vec::new(),
            floats: Vec::new(),
            strings: Vec::new(),
            data: Vec::new(),
            code: self.code,
            names: self.names,
            crc32: 0,
        }
    }

    /// Sérialise et écrit l'artefact sur disque via `Module::write_file`.
    #[cfg(feature = "std")]
    pub fn write_to_file<P: AsRef<std::path::Path>>(self, path: P) -> vitte_core::CoreResult<()> {
        self.into_module().write_file(path)
    }
}

/* ─────────────────────────── Résolution de portée ─────────────────────────── */

/// Une portée de bloc : noms locaux déclarés dans ce bloc, vers leur slot
/// dans la frame de la fonction englobante.
#[derive(Debug, Default)]
struct BlockScope {
    names: BTreeMap<String, u16>,
}

/// Positions à corriger quand une boucle se termine (`break`) ou reprend
/// (`continue`).
#[derive(Debug, Default)]
struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

/// État d'une fonction en cours de compilation : ses paramètres (frame
/// d'appel, taille fixe = arité), ses blocs de locaux (frame `EnvNew`,
/// toujours émise, même à zéro slot, pour garder une profondeur de
/// remontée `up` uniforme), et sa pile de boucles actives.
struct FuncScope {
    params: BTreeMap<String, u16>,
    blocks: Vec<BlockScope>,
    slot_count: u16,
    env_new_patch: usize,
    loop_stack: Vec<LoopCtx>,
}

impl FuncScope {
    fn new(params: &[String], env_new_patch: usize) -> Self {
        let mut map = BTreeMap::new();
        for (i, name) in params.iter().enumerate() {
            map.insert(name.clone(), i as u16);
        }
        Self {
            params: map,
            blocks: vec![BlockScope::default()],
            slot_count: 0,
            env_new_patch,
            loop_stack: Vec::new(),
        }
    }

    fn declare(&mut self, name: &str) -> u16 {
        let slot = self.slot_count;
        self.slot_count += 1;
        self.blocks.last_mut().expect("function always has a block").names.insert(name.into(), slot);
        slot
    }
}

/// Où un identifiant a été trouvé.
enum Resolved {
    /// Local de la fonction courante (frame `EnvNew`, `up == 0`).
    Local(u16),
    /// Local ou paramètre d'une fonction englobante.
    Upvalue(u16, u16),
    /// Ni local ni paramètre : une variable globale.
    Global,
}

/* ─────────────────────────── Émetteur ─────────────────────────── */

/// Marche l'AST et émet du bytecode en un seul passage.
///
/// Grounding : la boucle de visite suit la forme `Pass`/`Ctx` du
/// compilateur d'origine (un seul état mutable traversant l'AST), et la
/// convention slot/`up`/back-patch suit `vitte-vm`'s `Environment`
/// (`env.rs`) et les scénarios `closure_counter_scenario` /
/// `exception_round_trip_scenario` de `interpreter.rs`.
struct Emitter {
    code: Vec<u8>,
    names: Vec<String>,
    source_map: SourceMap,
    diags: Vec<Diagnostic>,
    funcs: Vec<FuncScope>,
    tmp_counter: u32,
    embed_names: bool,
}

impl Emitter {
    fn new(opts: &CompilerOptions) -> Self {
        Self {
            code: Vec::new(),
            names: Vec::new(),
            source_map: SourceMap::new(),
            diags: Vec::new(),
            funcs: Vec::new(),
            tmp_counter: 0,
            embed_names: opts.embed_names,
        }
    }

    fn note_name(&mut self, name: &str) {
        if self.embed_names && !self.names.iter().any(|n| n == name) {
            self.names.push(name.into());
        }
    }

    fn error(&mut self, message: impl Into<String>, span: Option<ast::Span>) {
        self.diags.push(Diagnostic::error(message, span));
    }

    /// Émet `op`, renvoie l'offset de son octet de tag (1 octet, toujours).
    fn emit(&mut self, op: OpCode) -> usize {
        let pos = self.code.len();
        encode(&mut self.code, &op);
        pos
    }

    fn patch_u16(&mut self, tag_offset: usize, value: u16) {
        let start = tag_offset + 1;
        self.code[start..start + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn patch_u32(&mut self, tag_offset: usize, value: u32) {
        let start = tag_offset + 1;
        self.code[start..start + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn patch_u64(&mut self, tag_offset: usize, value: u64) {
        let start = tag_offset + 1;
        self.code[start..start + 8].copy_from_slice(&value.to_be_bytes());
    }

    /// `DefFunctionPush(nargs, end_ip)` : `end_ip` est après le tag + `nargs` (u16).
    fn patch_def_function_end(&mut self, tag_offset: usize, end_ip: u32) {
        let start = tag_offset + 1 + 2;
        self.code[start..start + 4].copy_from_slice(&end_ip.to_be_bytes());
    }

    fn fresh_tmp(&mut self) -> String {
        let name = format!("$t{}", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }

    fn push_block(&mut self) {
        self.funcs.last_mut().expect("push_block outside a function").blocks.push(BlockScope::default());
    }

    fn pop_block(&mut self) {
        self.funcs.last_mut().expect("pop_block outside a function").blocks.pop();
    }

    fn declare_local(&mut self, name: &str) -> u16 {
        self.funcs.last_mut().expect("declare_local outside a function").declare(name)
    }

    fn resolve(&self, name: &str) -> Resolved {
        let mut up: u16 = 0;
        for func in self.funcs.iter().rev() {
            for block in func.blocks.iter().rev() {
                if let Some(&slot) = block.names.get(name) {
                    return if up == 0 { Resolved::Local(slot) } else { Resolved::Upvalue(slot, up) };
                }
            }
            let param_up = up + 1;
            if let Some(&slot) = func.params.get(name) {
                return Resolved::Upvalue(slot, param_up);
            }
            up = param_up + 1;
        }
        Resolved::Global
    }

    fn emit_get(&mut self, name: &str) {
        match self.resolve(name) {
            Resolved::Local(slot) => { self.emit(OpCode::GetLocal(slot)); }
            Resolved::Upvalue(slot, up) => { self.emit(OpCode::GetLocalUp(slot, up)); }
            Resolved::Global => {
                self.note_name(name);
                self.emit(OpCode::GetGlobal(name.into()));
            }
        }
    }

    fn emit_set(&mut self, name: &str) {
        match self.resolve(name) {
            Resolved::Local(slot) => { self.emit(OpCode::SetLocal(slot)); }
            Resolved::Upvalue(slot, up) => { self.emit(OpCode::SetLocalUp(slot, up)); }
            Resolved::Global => {
                self.note_name(name);
                self.emit(OpCode::SetGlobal(name.into()));
            }
        }
    }

    /* ─────── Programme ─────── */

    fn compile_program(&mut self, program: &ast::Program) {
        for item in &program.items {
            self.compile_item(item);
        }
        self.emit(OpCode::Halt);
    }

    fn compile_item(&mut self, item: &ast::Item) {
        match item {
            ast::Item::Function(f) => {
                self.note_name(&f.name);
                let params: Vec<String> = f.params.iter().map(|p| p.name.clone()).collect();
                self.compile_fn_value(&params, &f.body);
                self.emit(OpCode::SetGlobal(f.name.clone()));
            }
            ast::Item::Const(c) => {
                self.note_name(&c.name);
                self.compile_expr(&c.value);
                self.emit(OpCode::SetGlobal(c.name.clone()));
            }
            ast::Item::Struct(s) => {
                self.diags.push(Diagnostic::warn(
                    format!("struct `{}` is declaration-only; no bytecode emitted for it", s.name),
                    s.span,
                ));
            }
            ast::Item::Enum(e) => {
                self.diags.push(Diagnostic::warn(
                    format!("enum `{}` is declaration-only; no bytecode emitted for it", e.name),
                    e.span,
                ));
            }
        }
    }

    /* ─────── Fonctions / closures ─────── */

    /// Émet `DefFunctionPush` + corps inline + `EnvNew` de préambule, puis
    /// corrige les deux une fois la taille et la fin connues. Laisse
    /// exactement une valeur (la closure) empilée au point d'appel.
    ///
    /// La frame d'appel (créée par `enter_closure` côté VM) est dimensionnée
    /// à l'arité seule ; `EnvNew` ouvre toujours, par-dessus, une frame
    /// dédiée aux locaux du corps — même vide — de sorte que `up == 0`
    /// désigne toujours cette frame de locaux et `up == 1` désigne toujours
    /// la frame de paramètres, uniformément, qu'il y ait ou non des locaux
    /// additionnels.
    fn compile_fn_value(&mut self, params: &[String], body: &ast::Block) {
        let nargs = params.len() as u16;
        let def_patch = self.emit(OpCode::DefFunctionPush(nargs, 0));

        let env_new_patch = self.emit(OpCode::EnvNew(0));
        self.funcs.push(FuncScope::new(params, env_new_patch));

        for stmt in &body.stmts {
            self.compile_stmt(stmt);
        }
        if !matches!(body.stmts.last(), Some(ast::Stmt::Return(..))) {
            self.emit(OpCode::PushNil);
            self.emit(OpCode::Ret);
        }

        let func = self.funcs.pop().expect("function scope pushed above");
        self.patch_u16(func.env_new_patch, func.slot_count);

        let end_ip = self.code.len() as u32;
        self.patch_def_function_end(def_patch, end_ip);
    }

    /* ─────── Statements ─────── */

    fn compile_block(&mut self, block: &ast::Block) {
        self.push_block();
        for stmt in &block.stmts {
            self.compile_stmt(stmt);
        }
        self.pop_block();
    }

    fn record_span(&mut self, start: u32, span: Option<ast::Span>) {
        if let Some(span) = span {
            let end = self.code.len() as u32;
            let line = span.line as u32;
            self.source_map.push(start, end, line, line);
        }
    }

    fn compile_stmt(&mut self, stmt: &ast::Stmt) {
        let start = self.code.len() as u32;
        match stmt {
            ast::Stmt::Let { name, ty: _, value, span } => {
                match value {
                    Some(ast::Expr::Fn(fn_expr)) => {
                        let slot = self.declare_local(name);
                        self.compile_fn_value(&fn_expr.params, &fn_expr.body);
                        self.emit(OpCode::SetLocalFunctionDef(slot));
                    }
                    Some(expr) => {
                        self.compile_expr(expr);
                        let slot = self.declare_local(name);
                        self.emit(OpCode::SetLocal(slot));
                    }
                    None => {
                        self.emit(OpCode::PushNil);
                        let slot = self.declare_local(name);
                        self.emit(OpCode::SetLocal(slot));
                    }
                }
                self.record_span(start, *span);
            }
            ast::Stmt::Expr(expr) => {
                self.compile_expr(expr);
                self.emit(OpCode::Pop);
                self.record_span(start, expr_span(expr));
            }
            ast::Stmt::Return(expr, span) => {
                match expr {
                    Some(expr) => self.compile_expr(expr),
                    None => { self.emit(OpCode::PushNil); }
                }
                self.emit(OpCode::Ret);
                self.record_span(start, *span);
            }
            ast::Stmt::While { condition, body, span } => {
                self.compile_while(condition, body);
                self.record_span(start, *span);
            }
            ast::Stmt::For { var, iter, body, span } => {
                self.compile_for(var, iter, body);
                self.record_span(start, *span);
            }
            ast::Stmt::If { condition, then_block, else_block, span } => {
                self.compile_if(condition, then_block, else_block.as_ref());
                self.record_span(start, *span);
            }
            ast::Stmt::Try { body, handlers, span } => {
                self.compile_try(body, handlers);
                self.record_span(start, *span);
            }
            ast::Stmt::Raise(expr, span) => {
                self.compile_expr(expr);
                self.emit(OpCode::Raise);
                self.record_span(start, *span);
            }
            ast::Stmt::Break(span) => {
                match self.funcs.last_mut().and_then(|f| f.loop_stack.last_mut()) {
                    Some(loop_ctx) => {
                        let pos = self.emit_placeholder_jmp();
                        loop_ctx.break_patches.push(pos);
                    }
                    None => self.error("`break` outside of a loop", *span),
                }
                self.record_span(start, *span);
            }
            ast::Stmt::Continue(span) => {
                match self.funcs.last_mut().and_then(|f| f.loop_stack.last_mut()) {
                    Some(loop_ctx) => {
                        let pos = self.emit_placeholder_jmp();
                        loop_ctx.continue_patches.push(pos);
                    }
                    None => self.error("`continue` outside of a loop", *span),
                }
                self.record_span(start, *span);
            }
        }
    }

    fn emit_placeholder_jmp(&mut self) -> usize {
        self.emit(OpCode::Jmp(0))
    }

    fn compile_while(&mut self, condition: &ast::Expr, body: &ast::Block) {
        let loop_start = self.code.len() as u32;
        self.compile_expr(condition);
        let exit_patch = self.emit(OpCode::JNCond(0));

        self.funcs.last_mut().expect("loop outside a function").loop_stack.push(LoopCtx::default());
        self.compile_block(body);

        self.emit(OpCode::Jmp(loop_start));
        let loop_end = self.code.len() as u32;
        self.patch_u32(exit_patch, loop_end);

        let loop_ctx = self.funcs.last_mut().expect("loop pushed above").loop_stack.pop().unwrap();
        for pos in loop_ctx.break_patches {
            self.patch_u32(pos, loop_end);
        }
        for pos in loop_ctx.continue_patches {
            self.patch_u32(pos, loop_start);
        }
    }

    /// Itère un tableau par index : `arr`/`idx`/`len` dans des locaux
    /// synthétiques, `length` lu via `MemberGet` (méthode du bag `Array`).
    fn compile_for(&mut self, var: &str, iter: &ast::Expr, body: &ast::Block) {
        self.push_block();

        self.compile_expr(iter);
        let arr_slot = self.declare_local("$for_arr");
        self.emit(OpCode::SetLocal(arr_slot));

        self.emit(OpCode::Push64(0));
        let idx_slot = self.declare_local("$for_idx");
        self.emit(OpCode::SetLocal(idx_slot));

        self.emit(OpCode::GetLocal(arr_slot));
        self.emit(OpCode::MemberGet("length".into()));
        let len_slot = self.declare_local("$for_len");
        self.emit(OpCode::SetLocal(len_slot));

        let loop_start = self.code.len() as u32;
        self.emit(OpCode::GetLocal(idx_slot));
        self.emit(OpCode::GetLocal(len_slot));
        self.emit(OpCode::Lt);
        let exit_patch = self.emit(OpCode::JNCond(0));

        self.emit(OpCode::GetLocal(arr_slot));
        self.emit(OpCode::GetLocal(idx_slot));
        self.emit(OpCode::IndexGet);
        let var_slot = self.declare_local(var);
        self.emit(OpCode::SetLocal(var_slot));

        self.funcs.last_mut().expect("loop outside a function").loop_stack.push(LoopCtx::default());
        self.compile_block(body);

        let continue_target = self.code.len() as u32;
        self.emit(OpCode::GetLocal(idx_slot));
        self.emit(OpCode::Push64(1));
        self.emit(OpCode::Add);
        self.emit(OpCode::SetLocal(idx_slot));
        self.emit(OpCode::Jmp(loop_start));

        let loop_end = self.code.len() as u32;
        self.patch_u32(exit_patch, loop_end);

        let loop_ctx = self.funcs.last_mut().expect("loop pushed above").loop_stack.pop().unwrap();
        for pos in loop_ctx.break_patches {
            self.patch_u32(pos, loop_end);
        }
        for pos in loop_ctx.continue_patches {
            self.patch_u32(pos, continue_target);
        }

        self.pop_block();
    }

    fn compile_if(&mut self, condition: &ast::Expr, then_block: &ast::Block, else_block: Option<&ast::Block>) {
        self.compile_expr(condition);
        let else_patch = self.emit(OpCode::JNCond(0));
        self.compile_block(then_block);

        match else_block {
            Some(else_block) => {
                let end_patch = self.emit(OpCode::Jmp(0));
                let else_start = self.code.len() as u32;
                self.patch_u32(else_patch, else_start);
                self.compile_block(else_block);
                let end = self.code.len() as u32;
                self.patch_u32(end_patch, end);
            }
            None => {
                let end = self.code.len() as u32;
                self.patch_u32(else_patch, end);
            }
        }
    }

    /// `Try` consomme une liste sentinelle-terminée de paires
    /// `(target, etype)`, empilées du dernier gestionnaire au premier de
    /// façon à ce que le premier gestionnaire déclaré se retrouve en
    /// sommet de pile. Le corps protégé se termine par `ExframeRet`, qui
    /// saute par-dessus les trampolines de gestionnaires ; chacun d'eux se
    /// termine par un saut vers la même destination finale.
    fn compile_try(&mut self, body: &ast::Block, handlers: &[(ast::Expr, ast::Expr)]) {
        let mut target_patches = vec![0usize; handlers.len()];

        self.emit(OpCode::PushNil);
        for (i, (etype, _handler)) in handlers.iter().enumerate().rev() {
            target_patches[i] = self.emit(OpCode::Push64(0));
            self.compile_expr(etype);
        }
        self.emit(OpCode::Try);

        self.compile_block(body);
        let exframe_patch = self.emit(OpCode::ExframeRet(0));

        let mut end_jumps = Vec::with_capacity(handlers.len());
        for (i, (_etype, handler)) in handlers.iter().enumerate() {
            let handler_start = self.code.len() as u32;
            self.patch_u64(target_patches[i], handler_start as u64);

            match handler {
                ast::Expr::Fn(fn_expr) => {
                    self.push_block();
                    match fn_expr.params.first() {
                        Some(param) => {
                            let slot = self.declare_local(param);
                            self.emit(OpCode::SetLocal(slot));
                        }
                        None => { self.emit(OpCode::Pop); }
                    }
                    for stmt in &fn_expr.body.stmts {
                        self.compile_stmt(stmt);
                    }
                    self.pop_block();
                }
                other => {
                    self.error("try handler must be a function literal", expr_span(other));
                }
            }
            end_jumps.push(self.emit(OpCode::Jmp(0)));
        }

        let end_ip = self.code.len() as u32;
        self.patch_u32(exframe_patch, end_ip);
        for pos in end_jumps {
            self.patch_u32(pos, end_ip);
        }
    }

    /* ─────── Expressions ─────── */

    fn compile_expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Literal(lit) => self.compile_literal(lit),
            ast::Expr::Ident(name) => self.emit_get(name),
            ast::Expr::Call { func, args } => {
                for arg in args {
                    self.compile_expr(arg);
                }
                self.compile_expr(func);
                self.emit(OpCode::Call(args.len() as u16));
            }
            ast::Expr::Binary { left, op, right } => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit(binary_opcode(*op));
            }
            ast::Expr::Unary { op, expr } => {
                self.compile_expr(expr);
                match op {
                    ast::UnaryOp::Neg => { self.emit(OpCode::Negate); }
                    ast::UnaryOp::Not => { self.emit(OpCode::Not); }
                }
            }
            ast::Expr::Field { expr, field } => {
                self.compile_expr(expr);
                self.emit(OpCode::MemberGet(field.clone()));
            }
            ast::Expr::Index { expr, index } => {
                self.compile_expr(expr);
                self.compile_expr(index);
                self.emit(OpCode::IndexGet);
            }
            ast::Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(OpCode::Push64(items.len() as u64));
                self.emit(OpCode::ArrayLoad);
            }
            ast::Expr::Record { fields, methods } => self.compile_record(fields, methods),
            ast::Expr::Fn(fn_expr) => self.compile_fn_value(&fn_expr.params, &fn_expr.body),
            ast::Expr::Assign { target, op, value } => self.compile_assign(target, *op, value),
        }
    }

    fn compile_literal(&mut self, lit: &ast::Literal) {
        match lit {
            ast::Literal::Int(i) => { self.emit(OpCode::Push64(*i as u64)); }
            ast::Literal::Float(f) => { self.emit(OpCode::PushF64(*f)); }
            ast::Literal::Bool(b) => { self.emit(OpCode::Push8(u8::from(*b))); }
            ast::Literal::Str(s) => { self.emit(OpCode::PushStr(s.clone())); }
            ast::Literal::Null => { self.emit(OpCode::PushNil); }
        }
    }

    /// Champs d'abord (valeurs/clés empilées en ordre inverse, sentinelle
    /// `Nil`, `DictLoad`), puis méthodes liées une à une via `MemberSet` sur
    /// un alias global éphémère (pas d'opcode de duplication de pile
    /// disponible pour répéter la référence au record).
    fn compile_record(&mut self, fields: &[(String, ast::Expr)], methods: &[(String, ast::FnExpr)]) {
        self.emit(OpCode::PushNil);
        for (key, value) in fields.iter().rev() {
            self.compile_expr(value);
            self.emit(OpCode::PushStr(key.clone()));
        }
        self.emit(OpCode::DictLoad);

        if methods.is_empty() {
            return;
        }

        let tmp = self.fresh_tmp();
        self.emit(OpCode::SetGlobal(tmp.clone()));
        for (name, fn_expr) in methods {
            self.compile_fn_value(&fn_expr.params, &fn_expr.body);
            self.emit(OpCode::GetGlobal(tmp.clone()));
            self.emit(OpCode::MemberSet(name.clone()));
            self.emit(OpCode::Pop);
        }
        self.emit(OpCode::GetGlobal(tmp));
    }

    /// `a = v` laisse `v` en sommet de pile (les cibles composées le font
    /// déjà via `MemberSet`/`IndexSet` ; pour un identifiant on relit le
    /// local/global qu'on vient d'écrire juste après, faute d'opcode de
    /// duplication).
    fn compile_assign(&mut self, target: &ast::AssignTarget, op: Option<ast::BinaryOp>, value: &ast::Expr) {
        match target {
            ast::AssignTarget::Ident(name) => {
                if let Some(op) = op {
                    self.emit_get(name);
                    self.compile_expr(value);
                    self.emit(binary_opcode(op));
                } else {
                    self.compile_expr(value);
                }
                self.emit_set(name);
                self.emit_get(name);
            }
            ast::AssignTarget::Field { expr, field } => {
                self.compile_expr(expr);
                if let Some(op) = op {
                    self.emit(OpCode::MemberGetNoPop(field.clone()));
                    self.compile_expr(value);
                    self.emit(binary_opcode(op));
                } else {
                    self.compile_expr(value);
                }
                self.emit(OpCode::MemberSet(field.clone()));
            }
            ast::AssignTarget::Index { expr, index } => {
                if let Some(op) = op {
                    self.compile_expr(expr);
                    self.compile_expr(index);
                    self.emit(OpCode::IndexGet);
                    self.compile_expr(value);
                    self.emit(binary_opcode(op));

                    let tmp = self.fresh_tmp();
                    self.emit(OpCode::SetGlobal(tmp.clone()));
                    self.compile_expr(expr);
                    self.compile_expr(index);
                    self.emit(OpCode::GetGlobal(tmp));
                    self.emit(OpCode::IndexSet);
                } else {
                    self.compile_expr(expr);
                    self.compile_expr(index);
                    self.compile_expr(value);
                    self.emit(OpCode::IndexSet);
                }
            }
        }
    }
}

fn binary_opcode(op: ast::BinaryOp) -> OpCode {
    match op {
        ast::BinaryOp::Add => OpCode::Add,
        ast::BinaryOp::Sub => OpCode::Sub,
        ast::BinaryOp::Mul => OpCode::Mul,
        ast::BinaryOp::Div => OpCode::Div,
        ast::BinaryOp::Mod => OpCode::Mod,
        ast::BinaryOp::Eq => OpCode::Eq,
        ast::BinaryOp::Ne => OpCode::Neq,
        ast::BinaryOp::Lt => OpCode::Lt,
        ast::BinaryOp::Le => OpCode::Leq,
        ast::BinaryOp::Gt => OpCode::Gt,
        ast::BinaryOp::Ge => OpCode::Geq,
        ast::BinaryOp::And => OpCode::And,
        ast::BinaryOp::Or => OpCode::Or,
    }
}

/// Best-effort : seules certaines variantes d'`Expr` portent un `Span`
/// directement exploitable pour la table des lignes.
fn expr_span(expr: &ast::Expr) -> Option<ast::Span> {
    match expr {
        ast::Expr::Fn(fn_expr) => fn_expr.span,
        _ => None,
    }
}

/* ─────────────────────────── Façade ─────────────────────────── */

/// Façade haut niveau : construit, compile, expose les diagnostics.
pub struct Compiler {
    /// Options actives.
    pub options: CompilerOptions,
    diags: Vec<Diagnostic>,
}

impl Compiler {
    /// Nouveau compilateur avec les options données.
    pub fn new(options: CompilerOptions) -> Self {
        Self { options, diags: Vec::new() }
    }

    /// Compile un programme complet en un [`Artifact`].
    pub fn compile(&mut self, program: &ast::Program) -> CompileResult<Artifact> {
        self.diags.clear();

        let mut emitter = Emitter::new(&self.options);
        emitter.compile_program(program);

        let has_errors = emitter.diags.iter().any(|d| d.severity == Severity::Error);
        let has_warnings = emitter.diags.iter().any(|d| d.severity == Severity::Warning);
        self.diags = emitter.diags;

        if has_errors || (self.options.deny_warnings && has_warnings) {
            return Err(CompileError { diagnostics: core::mem::take(&mut self.diags) });
        }

        Ok(Artifact {
            version: self.options.vitbc_version,
            code: emitter.code,
            names: emitter.names,
            source_map: emitter.source_map,
        })
    }

    /// Consomme et renvoie les diagnostics accumulés lors du dernier appel
    /// à [`Compiler::compile`].
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        core::mem::take(&mut self.diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_ast::{BinaryOp, Block, Expr, Function, Item, Param, Program, Span, Stmt, Type};

    fn span() -> Span { Span::new(1, 1, 0) }

    #[test]
    fn empty_program_emits_just_halt() {
        let program = Program { items: Vec::new() };
        let mut compiler = Compiler::new(CompilerOptions::default());
        let artifact = compiler.compile(&program).expect("compiles");
        assert_eq!(artifact.code, vec![vitte_core::bytecode::opcode::tag::HALT]);
    }

    #[test]
    fn function_roundtrips_through_decoder() {
        // fn add(a, b) { return a + b; }
        let function = Function {
            name: "add".into(),
            params: vec![
                Param { name: "a".into(), ty: Type::Int, span: Some(span()) },
                Param { name: "b".into(), ty: Type::Int, span: Some(span()) },
            ],
            return_type: Some(Type::Int),
            body: Block {
                stmts: vec![Stmt::Return(
                    Some(Expr::Binary {
                        left: Box::new(Expr::Ident("a".into())),
                        op: BinaryOp::Add,
                        right: Box::new(Expr::Ident("b".into())),
                    }),
                    Some(span()),
                )],
                span: Some(span()),
            },
            span: Some(span()),
        };
        let program = Program { items: vec![Item::Function(function)] };

        let mut compiler = Compiler::new(CompilerOptions::default());
        let artifact = compiler.compile(&program).expect("compiles");

        // Le flux entier doit se décoder sans erreur jusqu'au `Halt` final.
        let reader = vitte_core::bytecode::opcode::CodeReader::new(&artifact.code);
        let mut ip = 0u32;
        let mut saw_add = false;
        while (ip as usize) < reader.len() {
            let (op, next) = reader.decode(ip).expect("valid instruction stream");
            if matches!(op, OpCode::Add) {
                saw_add = true;
            }
            ip = next;
        }
        assert!(saw_add, "compiled body should contain an Add instruction");
        assert!(artifact.names.iter().any(|n| n == "add"));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let program = Program {
            items: vec![Item::Function(Function {
                name: "f".into(),
                params: Vec::new(),
                return_type: None,
                body: Block { stmts: vec![Stmt::Break(Some(span()))], span: Some(span()) },
                span: Some(span()),
            })],
        };
        let mut compiler = Compiler::new(CompilerOptions::default());
        let err = compiler.compile(&program).expect_err("break outside a loop must fail");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("break")));
    }
}
