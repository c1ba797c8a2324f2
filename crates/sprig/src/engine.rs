/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template engine.
//!
//! [`Engine`] owns the loader, the tag registry, the filter table and the
//! compilation cache, and exposes the compile/render entry points. Every
//! operation has a synchronous and an asynchronous form producing
//! byte-identical output; the synchronous forms block on the async
//! pipeline, whose only suspension points are loader calls.
//!
//! Configuration problems (bad delimiters, bad method name) are reported
//! from [`Engine::new`], never deferred into a render call.

use std::sync::Arc;

use crate::ast::EscapeSetting;
use crate::cache::{CacheMode, CompileCache};
use crate::codegen::{self, CompiledTemplate, DepMap};
use crate::context::Context;
use crate::error::{TemplateError, TemplateResult};
use crate::exec::{RenderEnv, execute};
use crate::filters::{FilterFn, FilterTable};
use crate::inherit::{ChainLayer, find_extends, resolve_chain};
use crate::lexer::{Delimiters, tokenize};
use crate::loader::Loader;
use crate::parser::parse;
use crate::registry::{CustomTag, TagRegistry, TagTable};

/// The identity used for templates compiled from caller-supplied strings.
const ANONYMOUS: &str = "<string>";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Span delimiters recognized by the lexer.
    pub delimiters: Delimiters,
    /// Default output escaping mode.
    pub autoescape: EscapeSetting,
    /// Caching behavior for compiled templates.
    pub cache: CacheMode,
    /// Variables merged beneath every render's context. The per-render
    /// context wins on collision.
    pub locals: Context,
    /// Method name used in persisted artifacts.
    pub method_name: String,
    /// Text emitted verbatim before a persisted artifact. May not contain
    /// the artifact's own header marker `") {"`, so reloading can locate
    /// the payload.
    pub wrap_prefix: String,
    /// Text emitted verbatim after a persisted artifact. May not contain
    /// `}`, for the same reason.
    pub wrap_suffix: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            delimiters: Delimiters::default(),
            autoescape: EscapeSetting::Html,
            cache: CacheMode::Memory,
            locals: Context::new(),
            method_name: "tpl".to_string(),
            wrap_prefix: String::new(),
            wrap_suffix: String::new(),
        }
    }
}

impl Options {
    fn validate(&self) -> TemplateResult<()> {
        self.delimiters.validate()?;

        let mut chars = self.method_name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TemplateError::config(format!(
                "method name \"{}\" is not a valid identifier",
                self.method_name
            )));
        }

        if self.wrap_prefix.contains(") {") {
            return Err(TemplateError::config(
                "wrap prefix may not contain \") {\"; reloaded artifacts would be misparsed",
            ));
        }
        if self.wrap_suffix.contains('}') {
            return Err(TemplateError::config(
                "wrap suffix may not contain \"}\"; reloaded artifacts would be misparsed",
            ));
        }
        Ok(())
    }
}

/// A template engine bound to one loader and one configuration.
pub struct Engine {
    loader: Arc<dyn Loader>,
    options: Options,
    registry: TagRegistry,
    filters: FilterTable,
    tags: TagTable,
    cache: CompileCache,
}

impl Engine {
    /// Build an engine. Configuration is validated here; a misconfigured
    /// engine is never constructed.
    pub fn new(loader: Arc<dyn Loader>, options: Options) -> TemplateResult<Engine> {
        options.validate()?;
        let cache = CompileCache::new(options.cache);
        Ok(Engine {
            loader,
            options,
            registry: TagRegistry::default(),
            filters: FilterTable::default(),
            tags: TagTable::default(),
            cache,
        })
    }

    /// Build an engine with default options.
    pub fn with_loader(loader: Arc<dyn Loader>) -> TemplateResult<Engine> {
        Engine::new(loader, Options::default())
    }

    /// Register a filter. Templates compiled afterwards may use it;
    /// registering invalidates the cache so stale filter checks cannot
    /// survive.
    pub fn register_filter(&mut self, name: impl Into<String>, filter: FilterFn) {
        self.filters.register(name, filter);
        self.cache.invalidate();
    }

    /// Register a custom tag. The parse definition goes into the registry
    /// and the render function into the extensions table.
    pub fn register_tag(&mut self, name: impl Into<String>, tag: CustomTag) {
        let name = name.into();
        self.registry.register_custom(&name, &tag);
        self.tags.register(name, tag.render);
        self.cache.invalidate();
    }

    /// Compile the template at `path`, through the cache.
    pub fn compile(&self, path: &str) -> TemplateResult<Arc<CompiledTemplate>> {
        pollster::block_on(self.compile_async(path))
    }

    /// Asynchronous [`Engine::compile`].
    pub async fn compile_async(&self, path: &str) -> TemplateResult<Arc<CompiledTemplate>> {
        self.get_or_compile(path, None, &[]).await
    }

    /// Compile template source supplied as a string. References inside it
    /// resolve against the loader's default base. The result is not
    /// cached.
    pub fn compile_str(&self, source: &str) -> TemplateResult<Arc<CompiledTemplate>> {
        pollster::block_on(self.compile_str_async(source))
    }

    /// Asynchronous [`Engine::compile_str`].
    pub async fn compile_str_async(&self, source: &str) -> TemplateResult<Arc<CompiledTemplate>> {
        self.compile_source(source, ANONYMOUS, &[ANONYMOUS.to_string()])
            .await
    }

    /// Compile and render the template at `path`.
    pub fn render(&self, path: &str, context: &Context) -> TemplateResult<String> {
        pollster::block_on(self.render_async(path, context))
    }

    /// Asynchronous [`Engine::render`].
    pub async fn render_async(&self, path: &str, context: &Context) -> TemplateResult<String> {
        let compiled = self.compile_async(path).await?;
        self.render_compiled(&compiled, context)
    }

    /// Compile and render template source supplied as a string.
    pub fn render_str(&self, source: &str, context: &Context) -> TemplateResult<String> {
        pollster::block_on(self.render_str_async(source, context))
    }

    /// Asynchronous [`Engine::render_str`].
    pub async fn render_str_async(
        &self,
        source: &str,
        context: &Context,
    ) -> TemplateResult<String> {
        let compiled = self.compile_str_async(source).await?;
        self.render_compiled(&compiled, context)
    }

    /// Render an already-compiled template. Locals sit beneath the given
    /// context; the context wins on collision.
    pub fn render_compiled(
        &self,
        template: &CompiledTemplate,
        context: &Context,
    ) -> TemplateResult<String> {
        let merged = self.options.locals.merged_with(context);
        let env = RenderEnv {
            filters: &self.filters,
            tags: &self.tags,
            autoescape: self.options.autoescape,
        };
        execute(&template.program, merged.into_frame(), &env)
    }

    /// Compile the template at `path` and persist it as a source artifact
    /// that [`Engine::load_precompiled`] can reload without the original
    /// template text.
    pub fn precompile(&self, path: &str, minified: bool) -> TemplateResult<String> {
        let compiled = self.compile(path)?;
        codegen::to_source(
            &compiled,
            &self.options.method_name,
            &self.options.wrap_prefix,
            &self.options.wrap_suffix,
            minified,
        )
    }

    /// Reload a persisted artifact under the given identity and make it
    /// available through the cache.
    pub fn load_precompiled(
        &self,
        identity: &str,
        artifact: &str,
    ) -> TemplateResult<Arc<CompiledTemplate>> {
        let compiled = Arc::new(codegen::from_source(artifact, identity)?);
        self.cache.store(compiled.clone());
        Ok(compiled)
    }

    /// Drop every cached compilation.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Resolve, load and compile one referenced template, consulting the
    /// cache. `active` is the chain of identities currently being
    /// compiled, for cycle detection across includes and imports.
    async fn get_or_compile(
        &self,
        reference: &str,
        from: Option<&str>,
        active: &[String],
    ) -> TemplateResult<Arc<CompiledTemplate>> {
        let identity = self.loader.resolve(reference, from);
        if active.contains(&identity) {
            return Err(TemplateError::CircularInclude { identity });
        }
        if let Some(hit) = self.cache.get(&identity) {
            return Ok(hit);
        }
        tracing::debug!(identity = %identity, "Compiling template");

        let source = self.loader.load_async(&identity).await?;
        let mut active = active.to_vec();
        active.push(identity.clone());
        let compiled = self.compile_source(&source, &identity, &active).await?;
        self.cache.store(compiled.clone());
        Ok(compiled)
    }

    /// Run the full pipeline over one template's source: lex, parse,
    /// resolve inheritance, compile dependencies, generate code.
    async fn compile_source(
        &self,
        source: &str,
        identity: &str,
        active: &[String],
    ) -> TemplateResult<Arc<CompiledTemplate>> {
        let mut tree = parse(
            tokenize(source, &self.options.delimiters)?,
            &self.registry,
        )?;
        self.canonicalize(&mut tree, identity);

        // Walk the extends chain, most-derived first.
        let mut layers = vec![ChainLayer {
            identity: identity.to_string(),
            tree,
        }];
        while let Some((target, _line)) = find_extends(&layers[layers.len() - 1].tree)? {
            let current = &layers[layers.len() - 1].identity;
            let parent_identity = self.loader.resolve(&target, Some(current));
            if layers.iter().any(|l| l.identity == parent_identity)
                || active.contains(&parent_identity)
            {
                return Err(TemplateError::CircularExtends {
                    identity: parent_identity,
                });
            }
            let parent_source = self.loader.load_async(&parent_identity).await?;
            let mut parent_tree = parse(
                tokenize(&parent_source, &self.options.delimiters)?,
                &self.registry,
            )?;
            self.canonicalize(&mut parent_tree, &parent_identity);
            layers.push(ChainLayer {
                identity: parent_identity,
                tree: parent_tree,
            });
        }
        layers.reverse();
        let effective = resolve_chain(layers);

        // Compile every include/import dependency ahead of code
        // generation, so the emitted program is self-contained.
        let mut deps = DepMap::new();
        for reference in codegen::collect_refs(&effective) {
            if deps.contains_key(&reference.target) {
                continue;
            }
            // Targets are canonical identities by now; no further
            // resolution against the leaf is wanted.
            let result = Box::pin(self.get_or_compile(&reference.target, None, active)).await;
            let entry = match result {
                Ok(compiled) => Some(compiled),
                Err(TemplateError::TemplateNotFound { .. }) if reference.ignore_missing => None,
                Err(e) => return Err(e),
            };
            deps.insert(reference.target, entry);
        }

        let program = codegen::compile_tree(&effective, &self.registry, &self.filters, &deps)?;
        Ok(Arc::new(CompiledTemplate {
            identity: identity.to_string(),
            program,
        }))
    }

    /// Rewrite a parsed layer's include/import targets to canonical
    /// identities, anchored to the template that wrote them. Inheritance
    /// may splice this tree into a chain rooted elsewhere; a relative
    /// reference in a base layout must keep pointing next to the layout,
    /// not next to the extending leaf.
    fn canonicalize(&self, tree: &mut [crate::ast::Node], identity: &str) {
        codegen::canonicalize_refs(tree, &mut |target| {
            self.loader.resolve(target, Some(identity))
        });
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("filters", &self.filters)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn engine(templates: &[(&str, &str)]) -> Engine {
        engine_with(templates, Options::default())
    }

    fn engine_with(templates: &[(&str, &str)], options: Options) -> Engine {
        let mut loader = MemoryLoader::new();
        for (path, source) in templates {
            loader.add(*path, *source);
        }
        Engine::new(Arc::new(loader), options).expect("options should validate")
    }

    #[test]
    fn test_render_simple() {
        let e = engine(&[("page.html", "hello {{ name }}")]);
        let mut ctx = Context::new();
        ctx.insert("name", "world");
        assert_eq!(e.render("page.html", &ctx).unwrap(), "hello world");
    }

    #[test]
    fn test_render_str() {
        let e = engine(&[]);
        let mut ctx = Context::new();
        ctx.insert("n", 2);
        assert_eq!(e.render_str("{{ n + 1 }}", &ctx).unwrap(), "3");
    }

    #[test]
    fn test_sync_and_async_agree() {
        let e = engine(&[("page.html", "{% for x in [1, 2, 3] %}{{ x }}{% endfor %}")]);
        let ctx = Context::new();
        let sync = e.render("page.html", &ctx).unwrap();
        let asynced = pollster::block_on(e.render_async("page.html", &ctx)).unwrap();
        assert_eq!(sync, asynced);
        assert_eq!(sync, "123");
    }

    #[test]
    fn test_inheritance_end_to_end() {
        let e = engine(&[
            (
                "layout.html",
                "<title>{% block title %}default{% endblock %}</title>",
            ),
            (
                "page.html",
                "{% extends \"layout.html\" %}{% block title %}custom{% endblock %}",
            ),
        ]);
        let ctx = Context::new();
        assert_eq!(
            e.render("page.html", &ctx).unwrap(),
            "<title>custom</title>"
        );
        // Rendering the base directly is unaffected by its children.
        assert_eq!(
            e.render("layout.html", &ctx).unwrap(),
            "<title>default</title>"
        );
    }

    #[test]
    fn test_parent_tag_end_to_end() {
        let e = engine(&[
            ("base.html", "{% block b %}base{% endblock %}"),
            (
                "page.html",
                "{% extends \"base.html\" %}{% block b %}({% parent %}){% endblock %}",
            ),
        ]);
        assert_eq!(e.render("page.html", &Context::new()).unwrap(), "(base)");
    }

    #[test]
    fn test_circular_extends_detected() {
        let e = engine(&[
            ("a.html", "{% extends \"b.html\" %}"),
            ("b.html", "{% extends \"a.html\" %}"),
        ]);
        let err = e.render("a.html", &Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::CircularExtends { .. }));
    }

    #[test]
    fn test_circular_include_detected() {
        let e = engine(&[
            ("a.html", "{% include \"b.html\" %}"),
            ("b.html", "{% include \"a.html\" %}"),
        ]);
        let err = e.render("a.html", &Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::CircularInclude { .. }));
    }

    #[test]
    fn test_include_relative_resolution() {
        let e = engine(&[
            ("pages/index.html", "[{% include \"nav.html\" %}]"),
            ("pages/nav.html", "nav"),
        ]);
        assert_eq!(e.render("pages/index.html", &Context::new()).unwrap(), "[nav]");
    }

    #[test]
    fn test_base_layer_include_resolves_beside_base() {
        // A relative include written in a layout stays anchored to the
        // layout's directory, even when the extending template lives
        // elsewhere.
        let e = engine(&[
            (
                "layouts/base.html",
                "{% include \"nav.html\" %}|{% block main %}{% endblock %}",
            ),
            ("layouts/nav.html", "nav"),
            (
                "pages/page.html",
                "{% extends \"../layouts/base.html\" %}{% block main %}body{% endblock %}",
            ),
        ]);
        assert_eq!(
            e.render("pages/page.html", &Context::new()).unwrap(),
            "nav|body"
        );
    }

    #[test]
    fn test_locals_lose_to_context() {
        let mut options = Options::default();
        options.locals.insert("who", "locals");
        options.locals.insert("greeting", "hi");
        let e = engine_with(&[("page.html", "{{ greeting }} {{ who }}")], options);

        let mut ctx = Context::new();
        ctx.insert("who", "context");
        assert_eq!(e.render("page.html", &ctx).unwrap(), "hi context");
    }

    #[test]
    fn test_custom_delimiters() {
        let options = Options {
            delimiters: Delimiters {
                var_open: "<%=".to_string(),
                var_close: "%>".to_string(),
                tag_open: "<%".to_string(),
                tag_close: "%>".to_string(),
                comment_open: "<#".to_string(),
                comment_close: "#>".to_string(),
            },
            ..Options::default()
        };
        let e = engine_with(&[("page.html", "<%= name %> {{ literal }}")], options);
        let mut ctx = Context::new();
        ctx.insert("name", "x");
        assert_eq!(e.render("page.html", &ctx).unwrap(), "x {{ literal }}");
    }

    #[test]
    fn test_invalid_options_rejected_up_front() {
        let loader: Arc<dyn Loader> = Arc::new(MemoryLoader::new());
        let options = Options {
            method_name: "not a name".to_string(),
            ..Options::default()
        };
        let err = Engine::new(loader.clone(), options).unwrap_err();
        assert!(matches!(err, TemplateError::Configuration { .. }));

        let options = Options {
            delimiters: Delimiters {
                var_open: String::new(),
                ..Delimiters::default()
            },
            ..Options::default()
        };
        assert!(Engine::new(loader.clone(), options).is_err());

        let options = Options {
            wrap_prefix: "define(\"page\", function(a) {\n".to_string(),
            ..Options::default()
        };
        assert!(Engine::new(loader.clone(), options).is_err());

        let options = Options {
            wrap_suffix: "\n});".to_string(),
            ..Options::default()
        };
        assert!(Engine::new(loader, options).is_err());
    }

    #[test]
    fn test_precompile_round_trip() {
        let e = engine(&[("page.html", "hi {{ name }}")]);
        let artifact = e.precompile("page.html", true).unwrap();

        // A second engine with no access to the original source renders
        // from the artifact alone.
        let fresh = engine(&[]);
        let compiled = fresh.load_precompiled("/page.html", &artifact).unwrap();
        let mut ctx = Context::new();
        ctx.insert("name", "again");
        assert_eq!(fresh.render_compiled(&compiled, &ctx).unwrap(), "hi again");
        // And through the cache by identity.
        assert_eq!(fresh.render("page.html", &ctx).unwrap(), "hi again");
    }

    #[test]
    fn test_register_filter_and_recompile() {
        let mut e = engine(&[("page.html", "{{ name | shout }}")]);
        assert!(e.render("page.html", &Context::new()).is_err());

        e.register_filter(
            "shout",
            Arc::new(|args: &[Value]| {
                let input = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::Str(format!("{}!", input.render().to_uppercase())))
            }),
        );
        let mut ctx = Context::new();
        ctx.insert("name", "ada");
        assert_eq!(e.render("page.html", &ctx).unwrap(), "ADA!");
    }

    #[test]
    fn test_register_custom_tag() {
        use crate::registry::TagCall;

        let mut e = engine(&[("page.html", "{% hr %}")]);
        assert!(e.render("page.html", &Context::new()).is_err());

        e.register_tag(
            "hr",
            CustomTag::new(false, Arc::new(|_call: &TagCall| Ok("<hr>".to_string()))),
        );
        assert_eq!(e.render("page.html", &Context::new()).unwrap(), "<hr>");
    }

    #[test]
    fn test_autoescape_off_option() {
        let options = Options {
            autoescape: EscapeSetting::Off,
            ..Options::default()
        };
        let e = engine_with(&[("page.html", "{{ html }}")], options);
        let mut ctx = Context::new();
        ctx.insert("html", "<b>");
        assert_eq!(e.render("page.html", &ctx).unwrap(), "<b>");
    }
}
